//! Subscription lifecycle: drafts, quotations, confirmation, upgrade and cancel.

mod common;

use billing_service::models::SubscribeRequest;
use billing_service::services::BillingStore;
use common::{date, plan_input, subscribe_request, variant, variants, TestBilling};
use rust_decimal_macros::dec;
use service_core::error::AppError;

#[tokio::test]
async fn draft_is_saved_without_an_invoice_and_confirmed_later() {
    let billing = TestBilling::on(date(2025, 1, 10));
    let company = billing.company().await;
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Team", dec!(100), "monthly"),
        )
        .await;
    billing
        .discount(&company, "WELCOME", "fixed", dec!(25))
        .await;

    let request = SubscribeRequest {
        draft: true,
        discount_code: Some("welcome".to_string()),
        ..subscribe_request(&plan)
    };
    let draft = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();

    assert_eq!(draft.subscription.status, "draft");
    assert!(draft.invoice.is_none());
    assert!(billing.store.get_invoices(None).await.unwrap().is_empty());

    billing.set_today(date(2025, 1, 20));
    let confirmed = billing
        .subscriptions
        .confirm(&company.user, draft.subscription.subscription_id)
        .await
        .unwrap();
    let invoice = confirmed.invoice.unwrap();

    assert_eq!(confirmed.subscription.status, "active");
    assert_eq!(confirmed.subscription.start_date, date(2025, 1, 20));
    assert_eq!(invoice.due_date, date(2025, 2, 19));
    assert_eq!(invoice.amount, draft.subscription.total);
    assert_eq!(invoice.amount, dec!(88.50));
    assert_eq!(invoice.lines[1].description, "Discount: WELCOME");
    assert_eq!(invoice.lines[1].amount, dec!(-25));
    assert_eq!(billing.notifier.sent().len(), 1);
}

#[tokio::test]
async fn active_subscription_cannot_be_confirmed_again() {
    let billing = TestBilling::on(date(2025, 1, 10));
    let company = billing.company().await;
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Team", dec!(100), "monthly"),
        )
        .await;
    let receipt = billing.subscribe(&company.user, &plan).await;

    let err = billing
        .subscriptions
        .confirm(&company.user, receipt.subscription.subscription_id)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(billing.store.get_invoices(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn quotation_round_trip_through_admin_and_subscriber() {
    let billing = TestBilling::on(date(2025, 3, 1));
    let company = billing.company().await;
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Team", dec!(40), "weekly"),
        )
        .await;
    let receipt = billing.subscribe(&company.user, &plan).await;
    let sub_id = receipt.subscription.subscription_id;

    let err = billing
        .subscriptions
        .send_quote(&company.user, sub_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let quoted = billing
        .subscriptions
        .send_quote(&company.admin, sub_id)
        .await
        .unwrap();
    assert_eq!(quoted.status, "quotation");

    let confirmed = billing
        .subscriptions
        .confirm(&company.user, sub_id)
        .await
        .unwrap();
    assert_eq!(confirmed.subscription.status, "active");
    assert_eq!(billing.store.get_invoices(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn upgrade_reprices_without_variants_or_discount() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing
        .product(&company, "Cloud", vec![variant("Region", "EU", dec!(5))])
        .await;
    let starter = billing
        .plan(
            &company,
            plan_input(product.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;
    let pro = billing
        .plan(
            &company,
            plan_input(product.product_id, "Pro", dec!(80), "monthly"),
        )
        .await;
    billing
        .discount(&company, "FIRST10", "percent_first_month", dec!(10))
        .await;

    let request = SubscribeRequest {
        quantity: Some(serde_json::json!(2)),
        discount_code: Some("FIRST10".to_string()),
        selected_variants: variants(&[("Region", "EU")]),
        ..subscribe_request(&starter)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();
    assert_eq!(receipt.subscription.base_price, dec!(110));

    let upgraded = billing
        .subscriptions
        .upgrade(&company.user, receipt.subscription.subscription_id, pro.plan_id)
        .await
        .unwrap();

    assert_eq!(upgraded.plan_id, pro.plan_id);
    assert_eq!(upgraded.status, "active");
    assert_eq!(upgraded.base_price, dec!(160));
    assert_eq!(upgraded.discount_amount, dec!(0));
    assert!(upgraded.discount_code.is_none());
    assert_eq!(upgraded.subtotal, dec!(160));
    assert_eq!(upgraded.tax_amount, dec!(28.80));
    assert_eq!(upgraded.total, dec!(188.80));
    // billed at the next cycle
    assert_eq!(billing.store.get_invoices(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn only_the_subscriber_can_upgrade() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let bob = billing
        .user(company.company_id, "Bob", billing_service::models::Role::User)
        .await
        .actor();
    let product = billing.product(&company, "Cloud", vec![]).await;
    let starter = billing
        .plan(
            &company,
            plan_input(product.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;
    let pro = billing
        .plan(
            &company,
            plan_input(product.product_id, "Pro", dec!(80), "monthly"),
        )
        .await;
    let receipt = billing.subscribe(&company.user, &starter).await;

    let err = billing
        .subscriptions
        .upgrade(&bob, receipt.subscription.subscription_id, pro.plan_id)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn upgrade_rejects_plans_of_other_products_and_unknown_subscriptions() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let cloud = billing.product(&company, "Cloud", vec![]).await;
    let mail = billing.product(&company, "Mail", vec![]).await;
    let starter = billing
        .plan(
            &company,
            plan_input(cloud.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;
    let mailbox = billing
        .plan(
            &company,
            plan_input(mail.product_id, "Mailbox", dec!(5), "monthly"),
        )
        .await;
    let receipt = billing.subscribe(&company.user, &starter).await;

    let err = billing
        .subscriptions
        .upgrade(&company.user, receipt.subscription.subscription_id, mailbox.plan_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = billing
        .subscriptions
        .upgrade(&company.user, uuid::Uuid::new_v4(), starter.plan_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn cancelled_subscription_stays_cancelled() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;
    let receipt = billing.subscribe(&company.user, &plan).await;
    let sub_id = receipt.subscription.subscription_id;

    let cancelled = billing
        .subscriptions
        .cancel(&company.user, sub_id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, "cancelled");

    let err = billing
        .subscriptions
        .cancel(&company.admin, sub_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = billing
        .subscriptions
        .upgrade(&company.user, sub_id, plan.plan_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn subscriptions_are_scoped_to_company_and_owner() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let other = billing.company().await;
    let bob = billing
        .user(company.company_id, "Bob", billing_service::models::Role::User)
        .await
        .actor();
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;
    let alice_sub = billing.subscribe(&company.user, &plan).await;
    billing.subscribe(&bob, &plan).await;

    let own = billing
        .subscriptions
        .list_subscriptions(&company.user)
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(
        own[0].subscription_id,
        alice_sub.subscription.subscription_id
    );

    let all = billing
        .subscriptions
        .list_subscriptions(&company.admin)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    assert!(billing
        .subscriptions
        .list_subscriptions(&other.admin)
        .await
        .unwrap()
        .is_empty());

    let err = billing
        .subscriptions
        .cancel(&other.admin, alice_sub.subscription.subscription_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn failed_notification_does_not_fail_subscribe() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;

    billing.notifier.fail_deliveries();
    let receipt = billing.subscribe(&company.user, &plan).await;

    assert!(receipt.invoice.is_some());
    assert!(billing.notifier.sent().is_empty());
}

#[tokio::test]
async fn subscriber_is_notified_of_the_first_invoice() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Cloud", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Starter", dec!(50), "monthly"),
        )
        .await;

    let receipt = billing.subscribe(&company.user, &plan).await;
    let sent = billing.notifier.sent();

    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    assert_eq!(
        sent[0].invoice_number,
        receipt.invoice.unwrap().invoice_number
    );
    assert_eq!(sent[0].amount, dec!(59.00));
}
