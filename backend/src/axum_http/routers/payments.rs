use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use crates::{
    domain::value_objects::{
        enums::gateways::Gateway,
        payments::{CreatePaymentModel, RefundPaymentModel},
    },
    payments::momo_client::params_from_json,
};
use serde_json::Value;
use tracing::info;
use url::form_urlencoded;
use uuid::Uuid;

use super::{PaymentRouteState, authorize_admin};
use crate::{
    axum_http::error_responses::{ApiResponse, AppError},
    usecases::payment_callbacks::PaymentReturnView,
};

const DEFAULT_CLIENT_IP: &str = "127.0.0.1";

pub fn routes(state: PaymentRouteState) -> Router {
    Router::new()
        .route("/vnpay/create", post(create_vnpay_payment))
        .route("/momo/create", post(create_momo_payment))
        .route("/vnpay/return", get(vnpay_return))
        .route("/momo/return", get(momo_return))
        .route("/vnpay/notify", get(vnpay_notify).post(vnpay_notify))
        .route("/momo/notify", post(momo_notify))
        .route("/patient/:patient_id", get(list_patient_payments))
        .route("/:payment_id", get(get_payment))
        .route("/:payment_id/refund", post(refund_payment))
        .with_state(state)
}

pub async fn create_vnpay_payment(
    State(state): State<PaymentRouteState>,
    headers: HeaderMap,
    Json(model): Json<CreatePaymentModel>,
) -> Result<Response, AppError> {
    create_payment(state, Gateway::VnPay, &headers, model).await
}

pub async fn create_momo_payment(
    State(state): State<PaymentRouteState>,
    headers: HeaderMap,
    Json(model): Json<CreatePaymentModel>,
) -> Result<Response, AppError> {
    create_payment(state, Gateway::MoMo, &headers, model).await
}

async fn create_payment(
    state: PaymentRouteState,
    gateway: Gateway,
    headers: &HeaderMap,
    model: CreatePaymentModel,
) -> Result<Response, AppError> {
    let created = state
        .payments
        .create_payment(gateway, model, client_ip(headers))
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("Payment created", created),
    )
        .into_response())
}

pub async fn vnpay_return(
    State(state): State<PaymentRouteState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let view = state.callbacks.handle_return(Gateway::VnPay, params);
    redirect_to_result_page(&state.settings.result_page_url, &view)
}

pub async fn momo_return(
    State(state): State<PaymentRouteState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let view = state.callbacks.handle_return(Gateway::MoMo, params);
    redirect_to_result_page(&state.settings.result_page_url, &view)
}

pub async fn vnpay_notify(
    State(state): State<PaymentRouteState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> impl IntoResponse {
    let outcome = state.callbacks.handle_notify(Gateway::VnPay, params).await;
    info!(?outcome, "payments router: vnpay notify acknowledged");
    Json(outcome.vnpay_ack())
}

pub async fn momo_notify(
    State(state): State<PaymentRouteState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let params = params_from_json(&body);
    let outcome = state
        .callbacks
        .handle_notify(Gateway::MoMo, params.clone())
        .await;
    info!(?outcome, "payments router: momo notify acknowledged");
    Json(outcome.momo_ack(&params))
}

pub async fn get_payment(
    State(state): State<PaymentRouteState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.payments.get_payment(payment_id).await?;
    Ok(ApiResponse::ok("Payment found", payment))
}

pub async fn list_patient_payments(
    State(state): State<PaymentRouteState>,
    Path(patient_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payments = state.payments.list_patient_payments(patient_id).await?;
    Ok(ApiResponse::ok("Payments found", payments))
}

pub async fn refund_payment(
    State(state): State<PaymentRouteState>,
    Path(payment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(model): Json<RefundPaymentModel>,
) -> Result<Response, AppError> {
    authorize_admin(&headers, &state.settings)?;
    let refund = state.payments.refund(payment_id, model).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok("Refund recorded", refund)).into_response())
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header("x-real-ip").map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| DEFAULT_CLIENT_IP.to_string())
}

fn redirect_to_result_page(result_page_url: &str, view: &PaymentReturnView) -> Response {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("success", if view.success { "true" } else { "false" });
    if let Some(payment_id) = view.payment_id {
        query.append_pair("paymentId", &payment_id.to_string());
    }
    query.append_pair("message", &view.message);

    let separator = if result_page_url.contains('?') { '&' } else { '?' };
    let location = format!("{result_page_url}{separator}{}", query.finish());
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use crates::{
        domain::{
            repositories::notifications::MockNotificationSink,
            value_objects::enums::payment_statuses::PaymentStatus,
        },
        payments::gateway::{GatewayCheckout, MockPaymentGateway},
    };
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    use super::*;
    use crate::axum_http::routers::test_support::{
        ADMIN_TOKEN, body_json, pending_vnpay, signed_vnpay_query, test_app, vnpay_gateway,
    };

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "127.0.0.1");
        headers.insert("x-real-ip", "10.1.1.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "10.1.1.1");
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[tokio::test]
    async fn create_returns_pay_url_then_conflict() {
        let mut gateway = vnpay_gateway();
        gateway.expect_initiate().times(1).returning(|request| {
            assert_eq!(request.client_ip, "203.0.113.7");
            Ok(GatewayCheckout {
                pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?x=1".into(),
            })
        });
        let app = test_app(gateway, MockNotificationSink::new(), None).await;
        let body = serde_json::json!({
            "appointment_id": app.appointment_id,
            "amount": 500000,
        })
        .to_string();

        let request = || {
            Request::post("/api/v1/payments/vnpay/create")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::from(body.clone()))
                .unwrap()
        };

        let response = app.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(
            json["data"]["pay_url"],
            "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html?x=1"
        );

        let response = app.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["success"], false);
        assert_eq!(app.store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn repeated_notify_completes_once() {
        let mut sink = MockNotificationSink::new();
        sink.expect_notify().times(1).returning(|_, _| Ok(()));
        let app = test_app(vnpay_gateway(), sink, None).await;
        let payment = pending_vnpay(&app).await;
        let uri = format!(
            "/api/v1/payments/vnpay/notify?{}",
            signed_vnpay_query(payment.id, "50000000", "00")
        );

        for _ in 0..3 {
            let response = app
                .router
                .clone()
                .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["RspCode"], "00");
        }
        app.callbacks.drain_notifications().await;

        let rows = app.store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn tampered_notify_is_acknowledged_as_invalid_signature() {
        let app = test_app(vnpay_gateway(), MockNotificationSink::new(), None).await;
        let payment = pending_vnpay(&app).await;
        let query = signed_vnpay_query(payment.id, "50000000", "00")
            .replace("vnp_ResponseCode=00", "vnp_ResponseCode=24");

        let response = app
            .router
            .clone()
            .oneshot(
                Request::post(format!("/api/v1/payments/vnpay/notify?{query}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(body_json(response).await["RspCode"], "97");
        assert_eq!(app.store.snapshot().await[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn return_redirects_without_settling() {
        let app = test_app(vnpay_gateway(), MockNotificationSink::new(), None).await;
        let payment = pending_vnpay(&app).await;

        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!(
                    "/api/v1/payments/vnpay/return?{}",
                    signed_vnpay_query(payment.id, "50000000", "00")
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://clinic.example/payment/result?success=true"));
        assert!(location.contains(&format!("paymentId={}", payment.id)));
        assert_eq!(app.store.snapshot().await[0].status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let app = test_app(vnpay_gateway(), MockNotificationSink::new(), None).await;

        let response = app
            .router
            .clone()
            .oneshot(
                Request::get(format!("/api/v1/payments/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refund_requires_admin_token() {
        let mut sink = MockNotificationSink::new();
        sink.expect_notify().returning(|_, _| Ok(()));
        let app = test_app(vnpay_gateway(), sink, Some(ADMIN_TOKEN)).await;
        let payment = pending_vnpay(&app).await;
        app.router
            .clone()
            .oneshot(
                Request::get(format!(
                    "/api/v1/payments/vnpay/notify?{}",
                    signed_vnpay_query(payment.id, "50000000", "00")
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();

        let refund = |token: &str| {
            Request::post(format!("/api/v1/payments/{}/refund", payment.id))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(r#"{"reason":"Doctor cancelled","amount":"200000"}"#))
                .unwrap()
        };

        let response = app.router.clone().oneshot(refund("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.router.clone().oneshot(refund(ADMIN_TOKEN)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let rows = app.store.snapshot().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].amount, dec!(-200000));
    }
}
