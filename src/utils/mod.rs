use std::time::{SystemTime, UNIX_EPOCH};

const IPV4_MAPPED_PREFIX: &str = "::ffff:";

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Strips the IPv6-mapped prefix so `::ffff:10.0.0.2` dials as `10.0.0.2`.
pub fn normalize_peer_address(address: &str) -> String {
    let trimmed = address.trim();
    trimmed
        .strip_prefix(IPV4_MAPPED_PREFIX)
        .unwrap_or(trimmed)
        .to_string()
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_peer_address() {
        assert_eq!(normalize_peer_address("::ffff:192.168.1.7"), "192.168.1.7");
        assert_eq!(normalize_peer_address("192.168.1.7"), "192.168.1.7");
        assert_eq!(normalize_peer_address("fe80::1"), "fe80::1");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_filename(".mp4"), ".mp4");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }
}
