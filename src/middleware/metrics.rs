//! Counts control API requests per operation into [`AppState::requests`].
//!
//! Requests are labelled by the session operation they drive (`call.start`,
//! `call.mute`, ...) rather than by raw path, and each outcome is split into
//! rejected (4xx, e.g. an unsupported language) and failed (5xx, e.g. the
//! backend could not be reached).
//!
//! Long-lived responses (the session event stream) are counted when their
//! headers go out, not when the stream ends.

use crate::state::{AppState, RequestOutcome};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// The metrics label for a control API request.
pub fn operation_for(method: &Method, path: &str) -> &'static str {
    let path = path.trim_end_matches('/');
    let session = path.strip_prefix("/api/v1/session");

    match (method.as_str(), session) {
        ("POST", Some("/start")) => "call.start",
        ("POST", Some("/end")) => "call.end",
        ("POST", Some("/mute")) => "call.mute",
        ("PUT", Some("/language")) => "call.language",
        ("POST", Some("/reconnect")) => "call.reconnect",
        ("GET", Some("")) => "session.snapshot",
        ("GET", Some("/transcript")) => "session.transcript",
        ("GET", Some("/events")) => "session.events",
        _ => match (method.as_str(), path) {
            ("GET", "/api/v1/config") => "config.read",
            ("PUT", "/api/v1/config") => "config.update",
            ("GET", "/health") | ("GET", "/api/v1/health") => "health",
            ("GET", "/api/v1/metrics") => "metrics",
            _ => "other",
        },
    }
}

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let operation = operation_for(req.method(), req.path());
        let state = req.app_data::<web::Data<AppState>>().cloned();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;

            let outcome = match &result {
                Ok(response) => RequestOutcome::from_status(response.status()),
                Err(_) => RequestOutcome::Failed,
            };
            if let Some(state) = state {
                state.record_request(operation, started.elapsed().as_millis() as u64, outcome);
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::runner::spawn_with;
    use crate::session::testing::{test_config, MockDevices, MockTransportFactory};
    use crate::state::SharedMetrics;
    use actix_web::{test, App, HttpResponse};
    use std::sync::Arc;

    #[::core::prelude::v1::test]
    fn test_operations_follow_the_control_api() {
        assert_eq!(operation_for(&Method::POST, "/api/v1/session/start"), "call.start");
        assert_eq!(operation_for(&Method::POST, "/api/v1/session/end/"), "call.end");
        assert_eq!(operation_for(&Method::POST, "/api/v1/session/mute"), "call.mute");
        assert_eq!(operation_for(&Method::PUT, "/api/v1/session/language"), "call.language");
        assert_eq!(operation_for(&Method::POST, "/api/v1/session/reconnect"), "call.reconnect");
        assert_eq!(operation_for(&Method::GET, "/api/v1/session"), "session.snapshot");
        assert_eq!(operation_for(&Method::GET, "/api/v1/session/events"), "session.events");
        assert_eq!(operation_for(&Method::PUT, "/api/v1/config"), "config.update");
        assert_eq!(operation_for(&Method::GET, "/health"), "health");

        assert_eq!(operation_for(&Method::GET, "/api/v1/session/start"), "other");
        assert_eq!(operation_for(&Method::GET, "/favicon.ico"), "other");
    }

    #[actix_web::test]
    async fn test_rejected_requests_are_counted_per_operation() {
        let metrics = SharedMetrics::default();
        let (session, _task) = spawn_with(
            test_config(),
            Box::new(MockTransportFactory::default()),
            Box::new(MockDevices::default()),
            Arc::clone(&metrics),
        );
        let state = AppState::new(test_config(), session, metrics);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .route("/api/v1/session/mute", web::post().to(|| async { HttpResponse::Ok().finish() }))
                .route("/api/v1/session/language", web::put().to(|| async { HttpResponse::BadRequest().finish() })),
        )
        .await;

        for (method, path) in [
            (Method::POST, "/api/v1/session/mute"),
            (Method::POST, "/api/v1/session/mute"),
            (Method::PUT, "/api/v1/session/language"),
        ] {
            let req = test::TestRequest::default().method(method).uri(path).to_request();
            test::call_service(&app, req).await;
        }

        let requests = state.request_metrics();
        assert_eq!(requests.request_count, 3);
        assert_eq!(requests.rejected_count, 1);
        assert_eq!(requests.operations["call.mute"].request_count, 2);
        assert_eq!(requests.operations["call.language"].rejected_count, 1);
        assert_eq!(requests.operations["call.language"].failed_count, 0);
    }
}
