use time::format_description::{self, FormatItem};
use time::OffsetDateTime;

/// Value of `var` if set, otherwise `now` formatted with `pattern`.
fn stamp(var: &str, now: OffsetDateTime, pattern: &str) -> String {
    println!("cargo:rerun-if-env-changed={var}");
    if let Ok(value) = std::env::var(var) {
        return value;
    }
    let format: Option<Vec<FormatItem<'_>>> = format_description::parse(pattern).ok();
    format
        .and_then(|format| now.format(&format).ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    let now = OffsetDateTime::now_utc();
    let date = stamp("TILEWORK_BUILD_DATE", now, "[year]-[month]-[day]");
    let time = stamp("TILEWORK_BUILD_TIME", now, "[hour]:[minute]:[second]");

    println!("cargo:rustc-env=TILEWORK_BUILD_DATE={date}");
    println!("cargo:rustc-env=TILEWORK_BUILD_TIME={time}");
}
