use crate::usage::snapshot::UsageReading;

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// One-line summary: `pcpu=1.25% rss=12.0 MB vss=1.1 GB`.
pub fn format_reading(reading: &UsageReading) -> String {
    format!(
        "pcpu={:.2}% rss={} vss={}",
        reading.cpu_percent,
        format_bytes(reading.resident_bytes),
        format_bytes(reading.virtual_bytes)
    )
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn byte_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn reading_line() {
        let reading = UsageReading {
            cpu_percent: 1.234,
            resident_bytes: 12 * 1024 * 1024,
            virtual_bytes: 2048,
            sampled_at: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(format_reading(&reading), "pcpu=1.23% rss=12.0 MB vss=2 KB");
    }
}
