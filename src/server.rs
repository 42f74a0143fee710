// src/server.rs

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use warp::http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{reject::Rejection, reply::Reply, Filter};

use crate::reference::{Dataset, References};
use crate::report::{ReportBuilder, Selection, DOCX_MIME};

const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    builder: ReportBuilder,
    index_html: Arc<String>,
}

impl AppState {
    pub fn new(builder: ReportBuilder) -> Self {
        let index_html = Arc::new(render_index(builder.references()));
        Self {
            builder,
            index_html,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

#[derive(Deserialize)]
struct RegionsQuery {
    country: String,
}

fn error_reply(status: StatusCode, error: &str, details: Option<String>) -> Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error: error.to_string(),
            details,
        }),
        status,
    )
    .into_response()
}

async fn health_check() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "climate-report"
    })))
}

async fn list_regions(query: RegionsQuery, state: AppState) -> Result<impl Reply, Rejection> {
    let regions = state.builder.references().regions.regions(&query.country);
    Ok(warp::reply::json(&regions))
}

async fn create_report(selection: Selection, state: AppState) -> Result<Response, Rejection> {
    let start = Instant::now();
    info!(
        country = %selection.country,
        region = %selection.region,
        era5 = ?selection.era5,
        cmip6 = ?selection.cmip6,
        "report requested"
    );

    if let Err(e) = selection.resolve(state.builder.references()) {
        warn!(error = %e, "rejected selection");
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Invalid selection",
            Some(format!("{:#}", e)),
        ));
    }

    let bytes = match state.builder.build(&selection).await {
        Ok(doc) => doc.to_bytes(),
        Err(e) => {
            warn!(error = ?e, elapsed_s = start.elapsed().as_secs_f64(), "report failed");
            return Ok(error_reply(
                StatusCode::BAD_GATEWAY,
                "Report generation failed",
                Some(format!("{:#}", e)),
            ));
        }
    };
    let bytes = match bytes {
        Ok(b) => b,
        Err(e) => {
            return Ok(error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Writing report failed",
                Some(format!("{:#}", e)),
            ))
        }
    };

    info!(
        bytes = bytes.len(),
        elapsed_s = start.elapsed().as_secs_f64(),
        "report ready"
    );
    let mut resp = Response::new(bytes.into());
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(DOCX_MIME));
    if let Ok(v) = HeaderValue::from_str(&content_disposition(&selection.file_name())) {
        resp.headers_mut().insert(CONTENT_DISPOSITION, v);
    }
    Ok(resp)
}

/// `attachment` header with an ASCII fallback name and the UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if ascii == file_name {
        return format!("attachment; filename=\"{}\"", file_name);
    }
    let mut encoded = String::new();
    for b in file_name.bytes() {
        if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
            encoded.push(b as char);
        } else {
            let _ = write!(encoded, "%{:02X}", b);
        }
    }
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii, encoded
    )
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "Not found", None));
    }
    if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
            Some(e.to_string()),
        ));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "Invalid query",
            Some(e.to_string()),
        ));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            None,
        ));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(error_reply(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
            None,
        ));
    }
    warn!(?err, "unhandled rejection");
    Ok(error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Unhandled request",
        Some(format!("{:?}", err)),
    ))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let html = state.index_html.clone();
    let index = warp::path::end()
        .and(warp::get())
        .map(move || warp::reply::html(html.as_str().to_string()));

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(health_check);

    let regions = warp::path!("api" / "regions")
        .and(warp::get())
        .and(warp::query::<RegionsQuery>())
        .and(with_state(state.clone()))
        .and_then(list_regions);

    let report = warp::path("report")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state))
        .and_then(create_report);

    index
        .or(health)
        .or(regions)
        .or(report)
        .recover(handle_rejection)
}

pub async fn serve(state: AppState, addr: SocketAddr) {
    info!("Server starting on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Report form: http://{}/", addr);
    warp::serve(routes(state)).run(addr).await;
}

fn render_checkboxes(html: &mut String, refs: &References, dataset: Dataset) {
    let group = dataset.as_str().to_ascii_lowercase();
    let _ = write!(
        html,
        "<fieldset><legend>{}</legend>",
        dataset.as_str()
    );
    for code in dataset.variable_codes() {
        let (name, description) = match refs.variables.by_code(code) {
            Ok(v) => (v.name.as_str(), v.description.as_str()),
            Err(_) => (*code, ""),
        };
        let checked = if dataset.selected_by_default(code) {
            " checked"
        } else {
            ""
        };
        let _ = write!(
            html,
            r#"<label title="{desc}"><input type="checkbox" name="{group}" value="{code}"{checked}> {name}</label><br>"#,
            desc = escape(description),
            group = group,
            code = escape(*code),
            checked = checked,
            name = escape(name),
        );
    }
    html.push_str("</fieldset>");
}

/// The selection form. Country and region lists come from the region table.
pub fn render_index(refs: &References) -> String {
    let countries = refs.regions.countries();
    let first_regions = countries
        .first()
        .map(|c| refs.regions.regions(c))
        .unwrap_or_default();

    let mut html = String::from(concat!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
        "<title>Climate report</title></head><body>",
        "<h1>Climate and Climate Change report</h1>",
        "<form id=\"selection\"><label>Country <select id=\"country\">"
    ));
    for c in &countries {
        let _ = write!(html, "<option>{}</option>", escape(*c));
    }
    html.push_str("</select></label> <label>Region <select id=\"region\">");
    for r in &first_regions {
        let _ = write!(html, "<option>{}</option>", escape(*r));
    }
    html.push_str("</select></label>");

    render_checkboxes(&mut html, refs, Dataset::Era5);
    render_checkboxes(&mut html, refs, Dataset::Cmip6);

    html.push_str(INDEX_SCRIPT);
    html
}

const INDEX_SCRIPT: &str = r#"<button type="submit">Generate report</button> <span id="status"></span></form>
<script>
const country = document.getElementById('country');
const region = document.getElementById('region');
const status = document.getElementById('status');
country.addEventListener('change', async () => {
  const resp = await fetch('/api/regions?country=' + encodeURIComponent(country.value));
  const names = await resp.json();
  region.innerHTML = '';
  for (const n of names) { const o = document.createElement('option'); o.textContent = n; region.appendChild(o); }
});
const ticked = (g) => Array.from(document.querySelectorAll('input[name="' + g + '"]:checked')).map(i => i.value);
document.getElementById('selection').addEventListener('submit', async (ev) => {
  ev.preventDefault();
  status.textContent = 'Fetching data and building report...';
  const body = { country: country.value, region: region.value, era5: ticked('era5'), cmip6: ticked('cmip6') };
  const resp = await fetch('/report', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify(body) });
  if (!resp.ok) { const e = await resp.json(); status.textContent = e.error + ': ' + (e.details || ''); return; }
  const blob = await resp.blob();
  const a = document.createElement('a');
  a.href = URL.createObjectURL(blob);
  a.download = body.country + '_' + body.region + '.docx';
  a.click();
  status.textContent = 'Done.';
});
</script></body></html>"#;
