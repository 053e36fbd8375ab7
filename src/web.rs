//! HTTP control surface.
//!
//! `GET /` (and `POST /`) renders `assets/web_ui.html`. Any recognised form
//! field in the request is merged into the device settings first, so the
//! page always reflects the result of the submitted form.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use handlebars::Handlebars;
use log::{debug, info, warn};
use tokio::{net::TcpListener, time::Instant};

use crate::bus::{BridgeHandle, FormFields, PageVariables};
use crate::link::LinkStatus;
use crate::protocol::settings::*;


const TEMPLATE_NAME: &str = "web_ui";
const TEMPLATE: &str = include_str!("../assets/web_ui.html");

/// Page auto-refresh period, seconds.
pub const REFRESH_RATE_SECS: &str = "10";

/// Every variable name [resolve] knows about.
pub const VARIABLES: &[&str] = &[
    "VERSION", "CONNECTED_INFO", "MODBUS_INFO", "UPLINK_INFO", "UPTIME_SECS", "RATE", "ROOMTEMP",
    "POWER",
    "MODE_H", "MODE_D", "MODE_C", "MODE_F", "MODE_A",
    "FAN_A", "FAN_Q", "FAN_1", "FAN_2", "FAN_3", "FAN_4",
    "VANE_V", "VANE_C", "VANE_T",
    "WIDEVANE_V", "WIDEVANE_C", "WIDEVANE_T",
];


/// Everything a page render can show.
pub struct PageContext<'a> {
    pub settings: &'a DeviceSettings,
    pub now: Instant,
    pub started_at: Instant,
    pub last_device_contact: Option<Instant>,
    pub uplink: LinkStatus,
    /// `None` when the Modbus client is disabled.
    pub peer: Option<LinkStatus>,
}

fn checked(selected: bool) -> String {
    if selected { "checked".to_string() } else { String::new() }
}

fn label<T: Into<&'static str>>(value: Option<T>) -> String {
    value.map(|v| v.into().to_string()).unwrap_or_default()
}

fn vane_class(vane: Option<Vane>) -> &'static str {
    match vane {
        Some(Vane::Auto) | Some(Vane::Position1) => "rotate0",
        Some(Vane::Position2) => "rotate22",
        Some(Vane::Position3) => "rotate45",
        Some(Vane::Position4) => "rotate67",
        Some(Vane::Position5) => "rotate90",
        Some(Vane::Swing) => "rotateV",
        None => "",
    }
}

fn wide_vane_class(wide_vane: Option<WideVane>) -> &'static str {
    match wide_vane {
        Some(WideVane::FarLeft) => "rotate157",
        Some(WideVane::Left) => "rotate124",
        Some(WideVane::Center) => "rotate90",
        Some(WideVane::Right) => "rotate57",
        Some(WideVane::FarRight) => "rotate22",
        Some(WideVane::Split) => "",
        Some(WideVane::Swing) => "rotateH",
        None => "",
    }
}

const ARROW: &str = "&#10143;";

/// Display string for template variable `name`. Unknown names resolve to an empty string.
pub fn resolve(name: &str, ctx: &PageContext) -> String {
    let settings = ctx.settings;

    match name {
        "VERSION" => env!("CARGO_PKG_VERSION").to_string(),
        "CONNECTED_INFO" => {
            if settings.connected {
                let last_comms = ctx.last_device_contact
                    .map(|at| ctx.now.saturating_duration_since(at).as_secs().to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                format!("Connected to heatpump. Last comms: {last_comms} seconds ago")
            } else {
                "Not connected to heatpump.".to_string()
            }
        },
        "MODBUS_INFO" => match ctx.peer {
            Some(LinkStatus::Connected) => "Connected to Modbus peer.".to_string(),
            Some(LinkStatus::Disconnected) => "Not connected to Modbus peer.".to_string(),
            None => "Modbus client disabled.".to_string(),
        },
        "UPLINK_INFO" => match ctx.uplink {
            LinkStatus::Connected => "Network up.".to_string(),
            LinkStatus::Disconnected => "Network down.".to_string(),
        },
        "UPTIME_SECS" => ctx.now.saturating_duration_since(ctx.started_at).as_secs().to_string(),
        "RATE" => REFRESH_RATE_SECS.to_string(),
        "ROOMTEMP" => settings.room_temperature.map(|t| format!("{t:.2}")).unwrap_or_default(),
        "POWER" => checked(settings.power == Some(Power::On)),

        "MODE_H" => checked(settings.mode == Some(Mode::Heat)),
        "MODE_D" => checked(settings.mode == Some(Mode::Dry)),
        "MODE_C" => checked(settings.mode == Some(Mode::Cool)),
        "MODE_F" => checked(settings.mode == Some(Mode::Fan)),
        "MODE_A" => checked(settings.mode == Some(Mode::Auto)),

        "FAN_A" => checked(settings.fan == Some(Fan::Auto)),
        "FAN_Q" => checked(settings.fan == Some(Fan::Quiet)),
        "FAN_1" => checked(settings.fan == Some(Fan::Speed1)),
        "FAN_2" => checked(settings.fan == Some(Fan::Speed2)),
        "FAN_3" => checked(settings.fan == Some(Fan::Speed3)),
        "FAN_4" => checked(settings.fan == Some(Fan::Speed4)),

        "VANE_V" => label(settings.vane),
        "VANE_C" => vane_class(settings.vane).to_string(),
        "VANE_T" => {
            if settings.vane == Some(Vane::Auto) { "AUTO".to_string() } else { ARROW.to_string() }
        },

        "WIDEVANE_V" => label(settings.wide_vane),
        "WIDEVANE_C" => wide_vane_class(settings.wide_vane).to_string(),
        "WIDEVANE_T" => {
            if settings.wide_vane == Some(WideVane::Split) {
                format!("<div class='rotate124'>{ARROW}</div>&nbsp;<div class='rotate57'>{ARROW}</div>")
            } else {
                ARROW.to_string()
            }
        },

        _ => String::new()
    }
}

pub fn variables(ctx: &PageContext) -> PageVariables {
    VARIABLES.iter()
        .map(|name| (*name, resolve(name, ctx)))
        .collect()
}


fn parse_field<T: std::str::FromStr>(form: &FormFields, field: &str) -> Option<T> {
    // empty inputs and unselected options are submitted as ""
    let value = form.get(field).filter(|value| !value.is_empty())?;

    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring invalid {field}={value:?}");
            None
        }
    }
}

/// Merge the recognised form fields into `settings`.
///
/// Returns whether any field was present, i.e. whether the device needs to be updated.
pub fn apply_form(settings: &mut DeviceSettings, form: &FormFields) -> bool {
    let mut update = false;

    // an unchecked checkbox is not submitted at all, PWRCHK marks the power field as present
    if form.contains_key("PWRCHK") {
        let on = form.get("POWER").is_some_and(|value| value != "OFF");
        settings.power = Some(Power::from(on));
        update = true;
    }

    if let Some(mode) = parse_field::<Mode>(form, "MODE") {
        settings.mode = Some(mode);
        update = true;
    }

    if let Some(temperature) = parse_field::<i32>(form, "TEMP") {
        settings.temperature = Some(temperature as f32);
        update = true;
    }

    if let Some(fan) = parse_field::<Fan>(form, "FAN") {
        settings.fan = Some(fan);
        update = true;
    }

    if let Some(vane) = parse_field::<Vane>(form, "VANE") {
        settings.vane = Some(vane);
        update = true;
    }

    if let Some(wide_vane) = parse_field::<WideVane>(form, "WIDEVANE") {
        settings.wide_vane = Some(wide_vane);
        update = true;
    }

    update
}


#[derive(Clone)]
struct WebState {
    bridge: BridgeHandle,
    templates: Arc<Handlebars<'static>>,
}

pub fn templates() -> Result<Handlebars<'static>> {
    let mut templates = Handlebars::new();
    templates.register_template_string(TEMPLATE_NAME, TEMPLATE)
        .context("invalid web ui template")?;

    Ok(templates)
}

pub fn render(templates: &Handlebars, variables: &PageVariables) -> Result<String> {
    templates.render(TEMPLATE_NAME, variables)
        .context("failed to render web ui")
}

async fn page(state: WebState, form: FormFields) -> Response {
    debug!("http page request, form: {form:?}");

    let variables = match state.bridge.page(form).await {
        Ok(variables) => variables,
        Err(err) => return (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    };

    match render(&state.templates, &variables) {
        Ok(body) => Html(body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response(),
    }
}

async fn index(State(state): State<WebState>, Query(form): Query<FormFields>) -> Response {
    page(state, form).await
}

async fn submit(State(state): State<WebState>, Form(form): Form<FormFields>) -> Response {
    page(state, form).await
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "404 Not Found")
}

pub fn router(bridge: BridgeHandle) -> Result<Router> {
    let state = WebState {
        bridge,
        templates: Arc::new(templates()?),
    };

    Ok(Router::new()
        .route("/", get(index).post(submit))
        .fallback(not_found)
        .with_state(state))
}

pub async fn serve(listener: TcpListener, bridge: BridgeHandle) -> Result<()> {
    info!("http server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(bridge)?).await
        .context("http server failed")
}
