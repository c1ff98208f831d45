use crate::session::PortalView;

const URI_SCHEME: &str = "perspecta-portal://";

/// Overrides supplied on the command line or through a launch URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub server: Option<String>,
    pub token: Option<String>,
    pub view: Option<PortalView>,
}

pub fn parse_launch_options_from_args(args: &[String]) -> Result<LaunchOptions, String> {
    if args.is_empty() {
        return Ok(LaunchOptions::default());
    }

    if args.len() == 1 && is_portal_uri(&args[0]) {
        return parse_portal_uri(&args[0]);
    }

    let mut options = LaunchOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = || {
            inline_value
                .clone()
                .or_else(|| iter.next().cloned())
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| format!("Missing value after {flag}."))
        };
        match flag {
            "--server" => options.server = Some(value()?.trim().to_string()),
            "--token" => options.token = Some(value()?.trim().to_string()),
            "--view" => options.view = Some(parse_view(&value()?)?),
            other => return Err(format!("Unrecognized argument: {other}")),
        }
    }
    Ok(options)
}

pub fn parse_portal_uri(uri: &str) -> Result<LaunchOptions, String> {
    let rest = strip_portal_scheme(uri)
        .ok_or_else(|| format!("URL must start with {URI_SCHEME}"))?;

    let (location, query) = split_location_and_query(rest);
    let location = location.trim().trim_end_matches('/');
    if !location.is_empty() && !location.eq_ignore_ascii_case("open") {
        return Err(format!("Unsupported launch action: {location}"));
    }

    let mut options = LaunchOptions::default();
    let Some(query_string) = query else {
        return Ok(options);
    };
    for pair in query_string.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = key.trim().to_ascii_lowercase();
        let decoded_value = percent_decode(value)?;
        let trimmed = decoded_value.trim();
        if trimmed.is_empty() {
            continue;
        }
        match key.as_str() {
            "server" | "server_url" | "base_url" => options.server = Some(trimmed.to_string()),
            "token" => options.token = Some(trimmed.to_string()),
            "view" | "dashboard" => options.view = Some(parse_view(trimmed)?),
            _ => log::debug!("Ignoring launch parameter {key}"),
        }
    }
    Ok(options)
}

fn parse_view(value: &str) -> Result<PortalView, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "doctor" => Ok(PortalView::Doctor),
        "institute" | "center" => Ok(PortalView::Institute),
        other => Err(format!("Unknown view '{other}', expected doctor or institute.")),
    }
}

fn is_portal_uri(value: &str) -> bool {
    strip_portal_scheme(value).is_some()
}

fn strip_portal_scheme(uri: &str) -> Option<&str> {
    if uri.len() >= URI_SCHEME.len() && uri[..URI_SCHEME.len()].eq_ignore_ascii_case(URI_SCHEME) {
        Some(&uri[URI_SCHEME.len()..])
    } else {
        None
    }
}

fn split_location_and_query(value: &str) -> (&str, Option<&str>) {
    if let Some((location, query)) = value.split_once('?') {
        (location, Some(query))
    } else {
        (value, None)
    }
}

fn percent_decode(value: &str) -> Result<String, String> {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| "URL contains invalid UTF-8 after decoding.".to_string())
}
