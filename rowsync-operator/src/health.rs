use actix_web::dev::Server;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use rowsync_config::shared::HealthConfig;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_actix_web::TracingLogger;

/// Shared flag reporting whether the controller is running.
#[derive(Debug, Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, is_ready: bool) {
        self.0.store(is_ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[get("/health_check")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[get("/ready")]
async fn ready(readiness: web::Data<Readiness>) -> impl Responder {
    if readiness.is_ready() {
        HttpResponse::Ok().body("ready")
    } else {
        HttpResponse::ServiceUnavailable().body("not ready")
    }
}

fn configure(readiness: Readiness) -> impl Fn(&mut web::ServiceConfig) + Clone {
    let readiness = web::Data::new(readiness);

    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(readiness.clone())
            .service(health_check)
            .service(ready);
    }
}

/// Binds the health server. The returned [`Server`] must be awaited to serve requests.
///
/// Signal handling is left to the caller, which stops the server through its handle.
pub fn start_health_server(config: &HealthConfig, readiness: Readiness) -> anyhow::Result<Server> {
    let listener = TcpListener::bind(config.address())?;
    info!(address = %listener.local_addr()?, "health server listening");

    let configure = configure(readiness);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(configure.clone())
    })
    .workers(1)
    .disable_signals()
    .listen(listener)?
    .run();

    Ok(server)
}
