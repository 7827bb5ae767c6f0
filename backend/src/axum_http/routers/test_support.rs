//! In-memory wiring of the payment routers for router-level tests.

use std::{collections::BTreeMap, sync::Arc};

use axum::{Router, body::to_bytes, response::Response};
use chrono::{Duration, TimeZone, Utc};
use crates::{
    application::{
        payment_notifications::PaymentNotifier, payment_state_machine::PaymentStateMachine,
    },
    domain::{
        clock::{Clock, ManualClock},
        entities::{appointments::AppointmentEntity, payments::PaymentEntity},
        repositories::{notifications::MockNotificationSink, payments::PaymentRepository},
        value_objects::enums::{
            appointment_statuses::AppointmentStatus, gateways::Gateway,
            payment_methods::PaymentMethod, payment_statuses::PaymentStatus,
        },
    },
    infra::memory::{
        appointments::InMemoryAppointmentDirectory, payments::InMemoryPaymentRepository,
    },
    payments::{
        gateway::{GatewayRegistry, MockPaymentGateway},
        signer::{GatewaySigner, SignedMessage, VNPAY_SIGNATURE_FIELD, form_encode},
        verifier::CallbackVerifier,
    },
};
use rust_decimal_macros::dec;
use serde_json::Value;
use uuid::Uuid;

use super::{PaymentRouteState, payment_admin, payments};
use crate::{
    config::config_model::PaymentSettings,
    usecases::{payment_callbacks::PaymentCallbackUseCase, payments::PaymentUseCase},
};

pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const VNPAY_SECRET: &str = "VNPAYSECRET";

pub struct TestApp {
    pub router: Router,
    pub store: InMemoryPaymentRepository,
    pub clock: Arc<ManualClock>,
    pub appointment_id: Uuid,
    pub callbacks: Arc<PaymentCallbackUseCase>,
}

pub fn vnpay_gateway() -> MockPaymentGateway {
    let mut gateway = MockPaymentGateway::new();
    gateway.expect_gateway().return_const(Gateway::VnPay);
    gateway
}

pub async fn test_app(
    gateway: MockPaymentGateway,
    sink: MockNotificationSink,
    admin_token: Option<&str>,
) -> TestApp {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let store = InMemoryPaymentRepository::new();
    let appointments = InMemoryAppointmentDirectory::new();
    let appointment_id = Uuid::new_v4();
    appointments
        .upsert(AppointmentEntity {
            id: appointment_id,
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            status: AppointmentStatus::Confirmed,
            amount_due: Some(dec!(500000)),
        })
        .await;

    let repository: Arc<dyn PaymentRepository + Send + Sync> = Arc::new(store.clone());
    let state_machine = PaymentStateMachine::new(Arc::clone(&repository), clock.clone());
    let notifier = PaymentNotifier::new(Arc::new(sink));
    let callbacks = Arc::new(PaymentCallbackUseCase::new(
        Arc::clone(&repository),
        state_machine.clone(),
        notifier.clone(),
        [CallbackVerifier::new(GatewaySigner::vnpay(VNPAY_SECRET))],
    ));

    let state = PaymentRouteState {
        payments: Arc::new(PaymentUseCase::new(
            Arc::new(appointments),
            Arc::clone(&repository),
            state_machine.clone(),
            GatewayRegistry::new().with(Arc::new(gateway)),
            notifier.clone(),
            clock.clone(),
            Duration::minutes(30),
        )),
        callbacks: Arc::clone(&callbacks),
        settings: Arc::new(PaymentSettings {
            result_page_url: "https://clinic.example/payment/result".into(),
            admin_token: admin_token.map(str::to_string),
            stale_pending_after_minutes: 30,
        }),
    };

    let router = Router::new()
        .nest("/api/v1/payments", payments::routes(state.clone()))
        .nest("/api/v1/admin/payments", payment_admin::routes(state));

    TestApp {
        router,
        store,
        clock,
        appointment_id,
        callbacks,
    }
}

/// Seeds a 500,000 VND pending VNPay charge for the fixture appointment.
pub async fn pending_vnpay(app: &TestApp) -> PaymentEntity {
    let payment = PaymentEntity {
        id: Uuid::new_v4(),
        appointment_id: app.appointment_id,
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        amount: dec!(500000),
        method: PaymentMethod::VnPay,
        status: PaymentStatus::Pending,
        transaction_id: None,
        refund_of: None,
        failure_reason: None,
        description: None,
        created_at: app.clock.now(),
        settled_at: None,
    };
    app.store.seed(payment.clone()).await;
    payment
}

/// Signed notify/return query string as the gateway would send it.
pub fn signed_vnpay_query(payment_id: Uuid, amount: &str, code: &str) -> String {
    let mut params: BTreeMap<String, String> = [
        ("vnp_Amount", amount),
        ("vnp_BankCode", "NCB"),
        ("vnp_OrderInfo", "Thanh toan lich hen"),
        ("vnp_ResponseCode", code),
        ("vnp_TmnCode", "DEMOTMN"),
        ("vnp_TransactionNo", "14422574"),
        ("vnp_TransactionStatus", code),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    params.insert("vnp_TxnRef".into(), payment_id.to_string());
    let signature = GatewaySigner::vnpay(VNPAY_SECRET)
        .sign(&params, SignedMessage::Notification)
        .unwrap();
    params.insert(VNPAY_SIGNATURE_FIELD.into(), signature);

    params
        .iter()
        .map(|(key, value)| format!("{}={}", form_encode(key), form_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
