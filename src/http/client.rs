use crate::http::transport::Transport;
use crate::tls::config::build_tls_config;
use crate::trace::{ClientTrace, TracedRequest};
use anyhow::Context;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, LOCATION};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use std::path::PathBuf;
use url::Url;

pub const MAX_REDIRECTS: u8 = 10;

/// Client behaviour shared by every request it executes.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub follow_redirects: bool,
    pub max_redirects: u8,
    /// PEM bundle replacing the built-in web PKI roots.
    pub ca_file: Option<PathBuf>,
    pub insecure: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            max_redirects: MAX_REDIRECTS,
            ca_file: None,
            insecure: false,
        }
    }
}

/// HTTP client following redirects over a tracing [`Transport`].
pub struct Client {
    options: ClientOptions,
    transport: Transport,
}

impl Client {
    pub fn new(options: ClientOptions) -> Result<Self, anyhow::Error> {
        let tls_config = build_tls_config(options.ca_file.as_deref(), options.insecure)?;
        Ok(Self {
            options,
            transport: Transport::new(tls_config),
        })
    }

    /// Executes a request produced by [`crate::trace::attach`].
    pub async fn execute(
        &mut self,
        traced: TracedRequest<'_, Full<Bytes>>,
    ) -> Result<Response<Bytes>, anyhow::Error> {
        let (request, mut tracer) = traced.into_parts();
        self.execute_with(request, &mut tracer).await
    }

    pub async fn execute_with(
        &mut self,
        request: Request<Full<Bytes>>,
        trace: &mut dyn ClientTrace,
    ) -> Result<Response<Bytes>, anyhow::Error> {
        let mut hop = Hop::from_request(request);

        for i in 0..=self.options.max_redirects {
            let res = self.transport.round_trip(hop.to_request()?, trace).await?;
            if !self.options.follow_redirects {
                return Ok(res);
            }
            let Some(next) = hop.follow(&res)? else {
                return Ok(res);
            };
            if i == self.options.max_redirects {
                break;
            }
            debug!(
                "Redirecting to: {} ({}/{})",
                next.uri,
                i + 1,
                self.options.max_redirects
            );
            hop = next;
        }

        Err(anyhow!(
            "Exceeded maximum number of redirects ({})",
            self.options.max_redirects
        ))
    }
}

/// Everything needed to (re)issue a request on each redirect hop.
#[derive(Debug, Clone)]
struct Hop {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Full<Bytes>,
}

impl Hop {
    fn from_request(request: Request<Full<Bytes>>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        }
    }

    fn to_request(&self) -> Result<Request<Full<Bytes>>, anyhow::Error> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(self.body.clone())?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }

    /// The hop a redirect response points to, or `None` if `res` is not a
    /// followable redirect.
    fn follow<B>(&self, res: &Response<B>) -> Result<Option<Hop>, anyhow::Error> {
        let status = res.status();
        let keeps_method = match status {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => false,
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => true,
            _ => return Ok(None),
        };
        let location = res
            .headers()
            .get(LOCATION)
            .ok_or_else(|| anyhow!("Redirect response missing 'location' header"))?
            .to_str()?;

        let current: Url = self
            .uri
            .to_string()
            .parse()
            .context("Failed to parse request URL")?;
        let target = current
            .join(location)
            .with_context(|| format!("Invalid redirect location '{}'", location))?;
        let uri: Uri = target.as_str().parse()?;

        let mut next = Hop {
            method: self.method.clone(),
            uri,
            headers: self.headers.clone(),
            body: self.body.clone(),
        };
        if !keeps_method && self.method != Method::HEAD {
            next.method = Method::GET;
            next.body = Full::new(Bytes::new());
            next.headers.remove(CONTENT_TYPE);
            next.headers.remove(CONTENT_LENGTH);
        }
        if next.uri.authority() != self.uri.authority() {
            next.headers.remove(HOST);
            next.headers.remove(AUTHORIZATION);
            next.headers.remove(COOKIE);
        }
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn hop(method: Method, uri: &str) -> Hop {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(COOKIE, HeaderValue::from_static("session=1"));
        Hop {
            method,
            uri: uri.parse().unwrap(),
            headers,
            body: Full::new(Bytes::from_static(b"payload")),
        }
    }

    fn redirect(status: StatusCode, location: &str) -> Response<()> {
        Response::builder()
            .status(status)
            .header(LOCATION, location)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_see_other_switches_to_get() {
        let current = hop(Method::POST, "http://example.com/form");
        let next = current
            .follow(&redirect(StatusCode::SEE_OTHER, "/done"))
            .unwrap()
            .unwrap();

        assert_eq!(next.method, Method::GET);
        assert_eq!(next.uri.to_string(), "http://example.com/done");
        assert!(next.headers.get(CONTENT_TYPE).is_none());
        assert!(next.headers.get(COOKIE).is_some());
    }

    #[test]
    fn test_temporary_redirect_keeps_method_and_body() {
        let current = hop(Method::POST, "http://example.com/a/b");
        let next = current
            .follow(&redirect(StatusCode::TEMPORARY_REDIRECT, "c"))
            .unwrap()
            .unwrap();

        assert_eq!(next.method, Method::POST);
        assert_eq!(next.uri.to_string(), "http://example.com/a/c");
        assert!(next.headers.get(CONTENT_TYPE).is_some());
    }

    #[test]
    fn test_head_stays_head() {
        let current = hop(Method::HEAD, "http://example.com/");
        let next = current
            .follow(&redirect(StatusCode::FOUND, "/elsewhere"))
            .unwrap()
            .unwrap();
        assert_eq!(next.method, Method::HEAD);
    }

    #[test]
    fn test_cross_host_redirect_drops_credentials() {
        let current = hop(Method::GET, "http://example.com/");
        let next = current
            .follow(&redirect(StatusCode::MOVED_PERMANENTLY, "https://other.example/x"))
            .unwrap()
            .unwrap();

        assert_eq!(next.uri.to_string(), "https://other.example/x");
        assert!(next.headers.get(COOKIE).is_none());
    }

    #[test]
    fn test_non_redirect_is_not_followed() {
        let current = hop(Method::GET, "http://example.com/");
        let ok = Response::builder().status(StatusCode::OK).body(()).unwrap();
        assert!(current.follow(&ok).unwrap().is_none());
    }

    #[test]
    fn test_redirect_without_location_is_an_error() {
        let current = hop(Method::GET, "http://example.com/");
        let res = Response::builder().status(StatusCode::FOUND).body(()).unwrap();
        assert!(current.follow(&res).is_err());
    }
}
