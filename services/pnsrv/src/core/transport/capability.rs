//! Raw-socket privilege and interface checks
//!
//! Run once at startup so a missing CAP_NET_RAW fails closed with a typed
//! error instead of surfacing later as a socket error mid-connect.

use std::fs;
use std::path::Path;

use super::traits::TransportError;

const CAP_NET_RAW_BIT: u32 = 13;

/// Whether `CapEff` in a `/proc/<pid>/status` dump has CAP_NET_RAW
pub fn cap_eff_has_net_raw(status: &str) -> bool {
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|value| u64::from_str_radix(value.trim(), 16).ok())
        .is_some_and(|bits| bits & (1u64 << CAP_NET_RAW_BIT) != 0)
}

fn has_cap_net_raw() -> bool {
    fs::read_to_string("/proc/self/status")
        .map(|status| cap_eff_has_net_raw(&status))
        .unwrap_or(false)
}

fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Fail unless the process may open raw sockets
pub fn check_raw_socket_privilege(interface: &str) -> Result<(), TransportError> {
    if is_root() || has_cap_net_raw() {
        return Ok(());
    }
    Err(TransportError::PermissionDenied(interface.to_string()))
}

/// Fail unless `interface` exists
pub fn check_interface(interface: &str) -> Result<(), TransportError> {
    if cfg!(target_os = "linux") && !Path::new(&format!("/sys/class/net/{interface}")).exists() {
        return Err(TransportError::InterfaceNotFound(interface.to_string()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_cap_eff_parsing() {
        let with = "Name:\tpnsrv\nCapInh:\t0000000000000000\nCapEff:\t0000000000002000\n";
        let without = "Name:\tpnsrv\nCapEff:\t0000000000000000\n";
        assert!(cap_eff_has_net_raw(with));
        assert!(!cap_eff_has_net_raw(without));
        assert!(!cap_eff_has_net_raw("Name:\tpnsrv\n"));
    }
}
