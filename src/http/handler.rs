use crate::cli::app_config::Cli;
use crate::http::client::Client;
use crate::report::TimingReport;
use crate::trace::{attach, TraceSet};
use anyhow::Context;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT};
use http::{Request, Response};
use http_body_util::Full;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Runs the traced request described by `cli`, prints the response and then
/// the timing of every connection it used.
pub async fn http_request(cli: &Cli) -> Result<(), anyhow::Error> {
    let request = build_request(cli)?;
    let mut client = Client::new(cli.client_options())?;

    let mut traces = TraceSet::new();
    let outcome = {
        let traced = attach(request, &mut traces);
        timeout(Duration::from_secs(cli.max_time), client.execute(traced))
            .await
            .map_err(|_| anyhow!("Request timed out after {} seconds", cli.max_time))
            .and_then(|res| res)
    };

    let printed = match outcome {
        Ok(res) => handle_response(cli, res),
        Err(e) => Err(e),
    };
    print_timings(cli, &traces, Instant::now())?;
    printed
}

pub fn build_request(cli: &Cli) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let mut method = String::from("GET");
    let mut content_type_option = None;

    if cli.body_option.is_some() {
        method = String::from("POST");
        content_type_option = Some("application/x-www-form-urlencoded");
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.clone();
    }
    if cli.header_option {
        method = String::from("HEAD");
    }

    let mut request_builder = Request::builder().method(method.as_str()).uri(cli.url.as_str());
    if let Some(content_type) = content_type_option {
        request_builder = request_builder.header(CONTENT_TYPE, content_type);
    }
    request_builder = request_builder.header(ACCEPT, "*/*");
    let user_agent = cli
        .user_agent_option
        .as_deref()
        .unwrap_or(concat!("reqtrace/", env!("CARGO_PKG_VERSION")));
    request_builder = request_builder.header(USER_AGENT, HeaderValue::from_str(user_agent)?);
    if let Some(cookie) = cli.cookie_option.as_ref() {
        request_builder = request_builder.header(COOKIE, HeaderValue::from_str(cookie)?);
    }

    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        ensure!(split.len() == 2, "header error: '{}'", x);
        request_builder = request_builder.header(
            HeaderName::from_str(split[0])?,
            HeaderValue::from_str(split[1].trim_start())?,
        );
    }

    let body = cli
        .body_option
        .clone()
        .map_or(Full::new(Bytes::new()), |v| Full::new(Bytes::from(v)));
    let request = request_builder
        .body(body)
        .with_context(|| format!("Invalid request for '{}'", cli.url))?;

    debug!(
        "> {} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );
    for (key, value) in request.headers().iter() {
        debug!("> {}: {}", key, value.to_str()?);
    }
    Ok(request)
}

fn handle_response(cli: &Cli, res: Response<Bytes>) -> Result<(), anyhow::Error> {
    if cli.header_option || cli.verbosity >= 1 {
        info!("< {:?} {}", res.version(), res.status());
        for (key, value) in res.headers().iter() {
            info!("< {}: {}", key, value.to_str().unwrap_or("<binary>"));
        }
    }
    if cli.header_option {
        return Ok(());
    }

    let body = res.into_body();
    if let Some(file_path) = cli.file_path_option.as_ref() {
        std::fs::write(file_path, &body)
            .with_context(|| format!("Failed to write body to {}", file_path.display()))?;
        info!("Saved {} bytes to {}", body.len(), file_path.display());
        return Ok(());
    }

    match std::str::from_utf8(&body) {
        Ok(text) => print!("{text}"),
        Err(_) => {
            error!("[reqtrace: warning] response body is not valid UTF-8 and was not written.");
            error!("[reqtrace: warning] to save to a file, use `-o <filename>`");
        }
    }
    std::io::stdout().flush()?;
    Ok(())
}

fn print_timings(cli: &Cli, traces: &TraceSet, now: Instant) -> Result<(), anyhow::Error> {
    let report = TimingReport::new(traces, now);
    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
