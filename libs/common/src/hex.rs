//! Hex encoding utilities for frame dumps in trace logs

use std::fmt::Write;

/// Space separated dump, truncated after `limit` bytes
/// Example: [0x88, 0x92, 0xFE] with limit 2 -> "88 92 ..(+1)"
pub fn dump(data: &[u8], limit: usize) -> String {
    let shown = data.len().min(limit);
    let mut result = String::with_capacity(shown * 3 + 8);
    for (i, byte) in data[..shown].iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        let _ = write!(&mut result, "{:02X}", byte);
    }
    if data.len() > shown {
        let _ = write!(&mut result, " ..(+{})", data.len() - shown);
    }
    result
}

/// Format a MAC address as `AA:BB:CC:DD:EE:FF`
pub fn mac(addr: &[u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    )
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_dump_truncates() {
        assert_eq!(dump(&[0x88, 0x92, 0xFE], 2), "88 92 ..(+1)");
        assert_eq!(dump(&[0x01, 0x0E], 16), "01 0E");
    }

    #[test]
    fn test_mac() {
        assert_eq!(mac(&[0x01, 0x0E, 0xCF, 0, 0, 0]), "01:0E:CF:00:00:00");
    }
}
