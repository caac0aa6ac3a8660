use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Plain downstream transport using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Policies are not applied here; wrap it in a
/// [`ControlledClient`](crate::adapters::controlled_client::ControlledClient) for that.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);
        Ok(Self { client })
    }

    /// Set the Host header from the request URI authority.
    fn set_host_header(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let value = match req.uri().port_u16() {
            Some(port) => HeaderValue::from_str(&format!("{host}:{port}")),
            None => HeaderValue::from_str(host),
        }
        .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::set_host_header(&mut req)?;

        let span = tracing::debug_span!(
            "downstream_request",
            http.method = %req.method(),
            http.url = %req.uri(),
            http.status_code = tracing::field::Empty,
        );

        let (mut parts, body) = req.into_parts();
        // ALPN negotiates the actual version
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let client = self.client.clone();

        async move {
            match client.request(Request::from_parts(parts, body)).await {
                Ok(response) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());
                    let (mut parts, body) = response.into_parts();
                    parts.headers.remove(header::TRANSFER_ENCODING);
                    Ok(Response::from_parts(parts, AxumBody::new(body)))
                }
                Err(e) => {
                    tracing::warn!("Request to {} {} failed: {}", method, uri, e);
                    Err(HttpClientError::ConnectionError(format!(
                        "request to {method} {uri} failed: {e}"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }
}
