//! Subscribe-time pricing: base price, discounts, tax and invoice lines.

mod common;

use billing_service::models::{CreateDiscount, InvoiceLine, SubscribeRequest};
use billing_service::services::BillingStore;
use common::{date, plan_input, subscribe_request, variant, variants, TestBilling};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use service_core::error::AppError;

fn line_sum(lines: &[InvoiceLine]) -> Decimal {
    lines.iter().map(|l| l.amount).sum()
}

#[tokio::test]
async fn plain_monthly_plan_is_taxed_at_default_rate() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Streaming", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Basic", dec!(15.99), "monthly"),
        )
        .await;

    let receipt = billing.subscribe(&company.user, &plan).await;
    let sub = &receipt.subscription;
    let invoice = receipt.invoice.expect("first invoice");

    assert_eq!(sub.status, "active");
    assert_eq!(sub.base_price, dec!(15.99));
    assert_eq!(sub.discount_amount, dec!(0));
    assert_eq!(sub.subtotal, dec!(15.99));
    assert_eq!(sub.tax_percent, dec!(18));
    assert_eq!(sub.tax_amount, dec!(2.88));
    assert_eq!(sub.total, dec!(18.87));

    assert_eq!(invoice.amount, dec!(18.87));
    assert_eq!(invoice.status, "pending");
    assert_eq!(invoice.due_date, date(2025, 2, 14));
    assert_eq!(
        invoice.lines.0,
        vec![
            InvoiceLine {
                description: "Streaming - Basic x1".to_string(),
                amount: dec!(15.99),
            },
            InvoiceLine {
                description: "Tax (18%)".to_string(),
                amount: dec!(2.88),
            },
        ]
    );
    assert!(invoice.discount_amount.is_none());
}

#[tokio::test]
async fn percent_code_discounts_the_first_invoice() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Gym", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Premium", dec!(100), "monthly"),
        )
        .await;
    billing
        .discount(&company, "first10", "percent_first_month", dec!(10))
        .await;

    let request = SubscribeRequest {
        discount_code: Some("  First10 ".to_string()),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();
    let sub = &receipt.subscription;
    let invoice = receipt.invoice.unwrap();

    assert_eq!(sub.discount_code.as_deref(), Some("FIRST10"));
    assert_eq!(sub.discount_type.as_deref(), Some("percent_first_month"));
    assert_eq!(sub.discount_amount, dec!(10.00));
    assert_eq!(sub.subtotal, dec!(90.00));
    assert_eq!(sub.tax_amount, dec!(16.20));
    assert_eq!(sub.total, dec!(106.20));

    assert_eq!(invoice.lines.len(), 3);
    assert_eq!(invoice.lines[1].description, "Discount: FIRST10");
    assert_eq!(invoice.lines[1].amount, dec!(-10.00));
    assert_eq!(invoice.discount_label.as_deref(), Some("FIRST10"));
    assert_eq!(line_sum(&invoice.lines), invoice.amount);
}

#[tokio::test]
async fn matching_code_overrides_plan_discount() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Coworking", vec![]).await;
    let mut input = plan_input(product.product_id, "Desk", dec!(200), "monthly");
    input.discount_type = Some("percent_first_month".to_string());
    input.discount_value = Some(dec!(10));
    let plan = billing.plan(&company, input).await;
    billing.discount(&company, "FLAT50", "fixed", dec!(50)).await;

    let request = SubscribeRequest {
        discount_code: Some("flat50".to_string()),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();

    assert_eq!(receipt.subscription.discount_amount, dec!(50));
    assert_eq!(receipt.subscription.discount_type.as_deref(), Some("fixed"));
    assert_eq!(receipt.subscription.subtotal, dec!(150));
}

#[tokio::test]
async fn plan_discount_applies_without_a_matching_code() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Coworking", vec![]).await;
    let mut input = plan_input(product.product_id, "Desk", dec!(200), "monthly");
    input.discount_type = Some("percent_first_month".to_string());
    input.discount_value = Some(dec!(10));
    let plan = billing.plan(&company, input).await;

    let request = SubscribeRequest {
        discount_code: Some("NOSUCHCODE".to_string()),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();
    let invoice = receipt.invoice.unwrap();

    assert_eq!(receipt.subscription.discount_amount, dec!(20));
    assert!(receipt.subscription.discount_code.is_none());
    assert_eq!(invoice.lines[1].description, "Discount: Applied");
    assert_eq!(line_sum(&invoice.lines), invoice.amount);
}

#[tokio::test]
async fn inactive_code_is_ignored() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Coworking", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Desk", dec!(80), "monthly"),
        )
        .await;
    billing
        .catalog
        .create_discount(
            &company.admin,
            CreateDiscount {
                name: "OLD".to_string(),
                discount_type: "fixed".to_string(),
                value: dec!(30),
                active: false,
            },
        )
        .await
        .unwrap();

    let request = SubscribeRequest {
        discount_code: Some("old".to_string()),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();

    assert_eq!(receipt.subscription.discount_amount, dec!(0));
    assert_eq!(receipt.invoice.unwrap().lines.len(), 2);
}

#[tokio::test]
async fn fixed_discount_never_exceeds_the_base_price() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "Magazine", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Digital", dec!(30), "monthly"),
        )
        .await;
    billing.discount(&company, "BIG", "fixed", dec!(50)).await;

    let request = SubscribeRequest {
        discount_code: Some("BIG".to_string()),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();
    let sub = &receipt.subscription;
    let invoice = receipt.invoice.unwrap();

    assert_eq!(sub.discount_amount, dec!(30));
    assert_eq!(sub.subtotal, dec!(0));
    assert_eq!(sub.total, dec!(0));
    // base and discount only, no zero tax line
    assert_eq!(invoice.lines.len(), 2);
    assert_eq!(line_sum(&invoice.lines), dec!(0));
}

#[tokio::test]
async fn variant_surcharges_scale_with_quantity() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing
        .product(
            &company,
            "T-Shirt Club",
            vec![
                variant("Color", "Red", dec!(5)),
                variant("Color", "Blue", dec!(3)),
                variant("Size", "XL", dec!(2.50)),
            ],
        )
        .await;
    let mut input = plan_input(product.product_id, "Monthly Tee", dec!(20), "monthly");
    input.tax_percent = Some(dec!(0));
    let plan = billing.plan(&company, input).await;

    let request = SubscribeRequest {
        quantity: Some(json!("3")),
        selected_variants: variants(&[("Color", "Red"), ("Size", "XL"), ("Fit", "Slim")]),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();
    let invoice = receipt.invoice.unwrap();

    assert_eq!(receipt.subscription.quantity, 3);
    assert_eq!(receipt.subscription.base_price, dec!(82.50));
    assert_eq!(receipt.subscription.total, dec!(82.50));
    assert_eq!(
        invoice.lines[0].description,
        "T-Shirt Club - Monthly Tee x3 (Color: Red, Fit: Slim, Size: XL)"
    );
    assert_eq!(invoice.lines.len(), 1);
}

#[tokio::test]
async fn non_numeric_quantity_bills_one_unit() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "News", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Daily", dec!(1.25), "daily"),
        )
        .await;

    let request = SubscribeRequest {
        quantity: Some(json!("lots")),
        ..subscribe_request(&plan)
    };
    let receipt = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap();

    assert_eq!(receipt.subscription.quantity, 1);
    assert_eq!(receipt.subscription.base_price, dec!(1.25));
}

#[tokio::test]
async fn missing_plan_id_is_a_validation_error() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "News", vec![]).await;

    let request = SubscribeRequest {
        product_id: Some(product.product_id),
        ..Default::default()
    };
    let err = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
}

#[tokio::test]
async fn plan_of_another_company_is_not_found() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let other = billing.company().await;
    let product = billing.product(&other, "Elsewhere", vec![]).await;
    let plan = billing
        .plan(
            &other,
            plan_input(product.product_id, "Hidden", dec!(10), "monthly"),
        )
        .await;

    let err = billing
        .subscriptions
        .subscribe(&company.user, subscribe_request(&plan))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert!(billing
        .store
        .get_subscriptions(Some(company.company_id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn product_must_match_the_plan() {
    let billing = TestBilling::on(date(2025, 1, 15));
    let company = billing.company().await;
    let product = billing.product(&company, "A", vec![]).await;
    let unrelated = billing.product(&company, "B", vec![]).await;
    let plan = billing
        .plan(
            &company,
            plan_input(product.product_id, "Only A", dec!(10), "monthly"),
        )
        .await;

    let request = SubscribeRequest {
        product_id: Some(unrelated.product_id),
        ..subscribe_request(&plan)
    };
    let err = billing
        .subscriptions
        .subscribe(&company.user, request)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}
