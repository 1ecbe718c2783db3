use crate::state::TaskSnapshot;

const STATUS_TEMPLATE: &str = include_str!("../../assets/status.html");

pub const RUNNING_LABEL: &str = "Running";
pub const STOPPING_LABEL: &str = "Waiting to stop";

/// Human-readable byte count: one decimal, stepping at 1024.
pub fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["bytes", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// `log_href` is where the task log can be fetched from this server.
pub fn render_status(
    snap: &TaskSnapshot,
    refresh_seconds: u32,
    log_href: Option<&str>,
) -> String {
    let refresh = if refresh_seconds > 0 {
        format!("<meta http-equiv=\"refresh\" content=\"{refresh_seconds}\">")
    } else {
        String::new()
    };
    let status = if snap.stop_requested {
        format!("<label class=\"attention\">{STOPPING_LABEL}</label>")
    } else {
        format!("<label>{RUNNING_LABEL}</label>")
    };
    let log_link = match (&snap.log_path, log_href) {
        (Some(path), Some(href)) => {
            let shown = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!(
                "<a href=\"{}\">{}</a>",
                escape_html(href),
                escape_html(&shown)
            )
        }
        _ => "(none)".to_string(),
    };
    let log = escape_html(&snap.recent_log.join("\n"));

    fill_template(STATUS_TEMPLATE, |key| {
        Some(match key {
            "refresh" => refresh.clone(),
            "pid" => snap.identity.pid.to_string(),
            "cmdline" => escape_html(&snap.identity.cmdline),
            "started_at" => snap.identity.started_at.clone(),
            "updated_at" => snap.updated_at.clone(),
            "units" => snap.units_processed.to_string(),
            "records" => snap.records_processed.to_string(),
            "bytes" => format_bytes(snap.bytes_processed),
            "current_unit" => escape_html(&snap.current_unit),
            "progress_value" => snap.progress_value.to_string(),
            "progress_max" => snap.progress_max.to_string(),
            "status" => status.clone(),
            "log" => log.clone(),
            "log_link" => log_link.clone(),
            _ => return None,
        })
    })
}

// Single pass so substituted values are never rescanned for placeholders.
fn fill_template(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len() + 1024);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
