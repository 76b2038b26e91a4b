use actix_web::{HttpResponse, Responder};

/// HTTP endpoint that implements a shallow health check for the HTTP service.
pub(crate) async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("pong")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HEALTH_CHECK_ROUTE;

    use actix_web::{test, web, App};

    #[tokio::test]
    async fn test_health_check() {
        let app = test::init_service(
            App::new().route(HEALTH_CHECK_ROUTE, web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri(HEALTH_CHECK_ROUTE).to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "pong");
    }
}
