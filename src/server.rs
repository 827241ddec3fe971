use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{Result, SitemapError};
use crate::logger::log_request;
use crate::plugin_manager::PluginManager;
use crate::plugins::security::SecurityPlugin;
use crate::plugins::sitemap::SitemapPlugin;

pub const HEALTH_PATH: &str = "/health";

const XML_CONTENT_TYPE: &str = "application/xml";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Request routing, shared by every connection.
pub struct Router {
    sitemap_path: String,
    sitemap: Arc<SitemapPlugin>,
    security: Arc<SecurityPlugin>,
    plugins: Arc<PluginManager>,
}

impl Router {
    pub fn new(
        sitemap_path: impl Into<String>,
        sitemap: Arc<SitemapPlugin>,
        security: Arc<SecurityPlugin>,
        plugins: Arc<PluginManager>,
    ) -> Self {
        Self {
            sitemap_path: sitemap_path.into(),
            sitemap,
            security,
            plugins,
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let span = info_span!("request", id = %Uuid::new_v4(), method = %method, path = %path);

        let response = self.route(req).instrument(span).await;
        log_request(method.as_str(), &path, response.status().as_u16(), started.elapsed());
        response
    }

    async fn route(&self, req: Request<Body>) -> Response<Body> {
        let origin = req
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if req.method() == Method::OPTIONS {
            return self.preflight(origin.as_deref()).await;
        }

        let mut response = match req.uri().path() {
            path if path == self.sitemap_path => match *req.method() {
                Method::GET | Method::HEAD => self.sitemap_response().await,
                _ => method_not_allowed("GET, HEAD, OPTIONS"),
            },
            HEALTH_PATH => match *req.method() {
                Method::GET => self.health_response().await,
                _ => method_not_allowed("GET, OPTIONS"),
            },
            path => {
                debug!("No route for {}", path);
                text(StatusCode::NOT_FOUND, "Not Found")
            }
        };

        if let Some(origin) = origin {
            if let Some(cors) = self.security.cors_headers(&origin).await {
                extend_headers(response.headers_mut(), cors);
            }
        }
        response
    }

    async fn preflight(&self, origin: Option<&str>) -> Response<Body> {
        let Some(origin) = origin else {
            let mut response = empty(StatusCode::NO_CONTENT);
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));
            return response;
        };

        match self.security.preflight_headers(origin).await {
            Some(headers) => {
                let mut response = empty(StatusCode::NO_CONTENT);
                extend_headers(response.headers_mut(), headers);
                response
            }
            None => text(StatusCode::FORBIDDEN, "Origin not allowed"),
        }
    }

    async fn sitemap_response(&self) -> Response<Body> {
        match self.sitemap.serve().await {
            Ok(document) => {
                let mut response = Response::new(Body::from(document));
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
                response
            }
            Err(e) => {
                error!("Failed to serve sitemap: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    async fn health_response(&self) -> Response<Body> {
        let plugins = self.plugins.health_check().await;
        let healthy = plugins.values().all(|ok| *ok);
        let stats = self.sitemap.stats().await;

        let body = json!({
            "status": if healthy { "ok" } else { "degraded" },
            "plugins": &plugins,
            "sitemap": {
                "cached": stats.cached,
                "age_ms": stats.age.map(|age| age.as_millis() as u64),
                "ttl_ms": stats.ttl.as_millis() as u64,
                "builds": stats.builds,
                "hits": stats.hits,
                "failures": stats.failures,
            },
        });

        let status = if healthy {
            StatusCode::OK
        } else {
            warn!("Health check degraded: {:?}", plugins);
            StatusCode::SERVICE_UNAVAILABLE
        };
        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
    response
}

fn method_not_allowed(allow: &'static str) -> Response<Body> {
    let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    response.headers_mut().insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

fn extend_headers(target: &mut HeaderMap, extra: HeaderMap) {
    for (name, value) in extra.iter() {
        target.insert(name.clone(), value.clone());
    }
}

pub struct SitemapServer {
    addr: SocketAddr,
    router: Arc<Router>,
}

impl SitemapServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        info!("Creating new sitemap server on {}", addr);
        Self {
            addr,
            router: Arc::new(router),
        }
    }

    /// Binds the listener and serves in a background task until `shutdown`
    /// resolves. Returns the bound address, which differs from the configured
    /// one when port 0 was requested.
    pub fn start<F>(&self, shutdown: F) -> Result<(SocketAddr, JoinHandle<Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router.clone();

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            debug!("New connection from: {}", remote_addr);

            let router = router.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let router = router.clone();
                    async move { Ok::<_, Infallible>(router.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&self.addr)
            .map_err(|e| SitemapError::Network(format!("bind {}: {}", self.addr, e)))?
            .serve(make_svc);
        let local_addr = server.local_addr();
        info!("Sitemap server listening on {}", local_addr);

        let graceful = server.with_graceful_shutdown(shutdown);
        let handle = tokio::spawn(async move {
            if let Err(e) = graceful.await {
                error!("Server error: {}", e);
                return Err(SitemapError::from(e));
            }
            info!("Sitemap server stopped");
            Ok(())
        });

        Ok((local_addr, handle))
    }
}
