use crate::state::{MetricKind, MetricUnit, BYTES_PER_GIB, BYTES_PER_MIB};
use std::time::{Duration, UNIX_EPOCH};

pub fn percent(value: f64) -> String {
    format!("{value:.1}%")
}

pub fn speed(bytes_per_sec: f64) -> String {
    let mbps = bytes_per_sec / BYTES_PER_MIB;
    let kbps = bytes_per_sec / 1024.0;
    if mbps >= 1.0 {
        format!("{mbps:.1} MB/s")
    } else if kbps >= 1.0 {
        format!("{kbps:.0} KB/s")
    } else {
        format!("{:.0} B/s", bytes_per_sec.max(0.0))
    }
}

pub fn bytes_compact(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= BYTES_PER_GIB {
        format!("{:.1} GB", b / BYTES_PER_GIB)
    } else if b >= BYTES_PER_MIB {
        format!("{:.0} MB", b / BYTES_PER_MIB)
    } else {
        format!("{:.0} KB", b / 1024.0)
    }
}

/// Present value of `kind` in its unit.
pub fn metric_value(kind: MetricKind, value: f64) -> String {
    match kind.unit() {
        MetricUnit::Percent => percent(value),
        MetricUnit::BytesPerSec => speed(value),
    }
}

pub fn format_unix(ts: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(ts.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}

pub fn format_unix_ms(ts_ms: i64) -> String {
    format_unix(ts_ms / 1000)
}

pub fn human_age(age_secs: u64) -> String {
    if age_secs < 60 {
        format!("{age_secs} сек назад")
    } else if age_secs < 3600 {
        format!("{} мин назад", age_secs / 60)
    } else {
        format!("{} ч назад", age_secs / 3600)
    }
}

pub fn human_uptime(started_at: i64, now: i64) -> String {
    let diff = now.saturating_sub(started_at).max(0) as u64;
    let days = diff / 86_400;
    let hours = (diff % 86_400) / 3600;
    let mins = (diff % 3600) / 60;

    if days > 0 {
        format!("{}д {}ч {}м", days, hours, mins)
    } else if hours > 0 {
        format!("{}ч {}м", hours, mins)
    } else if mins > 0 {
        format!("{}м", mins)
    } else {
        format!("{}с", diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_picks_the_largest_fitting_unit() {
        assert_eq!(speed(512.0), "512 B/s");
        assert_eq!(speed(2048.0), "2 KB/s");
        assert_eq!(speed(1.5 * BYTES_PER_MIB), "1.5 MB/s");
    }

    #[test]
    fn bytes_compact_units() {
        assert_eq!(bytes_compact(512 * 1024), "512 KB");
        assert_eq!(bytes_compact(300 * 1024 * 1024), "300 MB");
        assert_eq!(bytes_compact(3 * (1 << 30) / 2), "1.5 GB");
    }

    #[test]
    fn metric_value_follows_the_unit() {
        assert_eq!(metric_value(MetricKind::CpuTotal, 42.26), "42.3%");
        assert_eq!(metric_value(MetricKind::NetworkUpload, 4096.0), "4 KB/s");
    }

    #[test]
    fn unix_time_is_rfc3339() {
        assert_eq!(format_unix(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_unix_ms(1_500), "1970-01-01T00:00:01Z");
    }

    #[test]
    fn uptime_and_age_are_compact() {
        assert_eq!(human_uptime(0, 59), "59с");
        assert_eq!(human_uptime(0, 3_720), "1ч 2м");
        assert_eq!(human_uptime(0, 90_000), "1д 1ч 0м");
        assert_eq!(human_age(30), "30 сек назад");
        assert_eq!(human_age(7_200), "2 ч назад");
    }
}
