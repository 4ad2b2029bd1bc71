//! Platform Command Families
//!
//! | Family | Bring-up | Tear-down | Status |
//! |--------|----------|-----------|--------|
//! | `TunnelService` (Windows) | `wireguard.exe /installtunnelservice <path>` | `wireguard.exe /uninstalltunnelservice <iface>` | `wg show` |
//! | `WgQuick` (Linux, macOS) | `wg-quick up <path>` | `wg-quick down <path \| iface>` | `wg show` |
//!
//! On unix the commands are optionally prefixed with `sudo`; the status
//! query uses `sudo -n` so a polling loop never blocks on a password prompt.
//!
//! `wg-quick down <iface>` only works when `/etc/wireguard/<iface>.conf`
//! exists, which is never the case for a tunnel brought up from a staged
//! file by an earlier process. On Linux the link is then deleted directly
//! with `ip link delete dev <iface>`. macOS has no such fallback.

use crate::controller::SessionError;
use std::path::Path;
use wgkit_engine::Invocation;

/// Which set of engine commands drives the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    /// WireGuard for Windows tunnel service
    TunnelService,
    /// `wg-quick` bring-up / bring-down
    WgQuick,
}

impl CommandFamily {
    /// Family for the platform this binary runs on
    pub fn detect() -> Result<Self, SessionError> {
        Self::for_os(std::env::consts::OS)
    }

    /// Family for an OS name as reported by `std::env::consts::OS`
    pub fn for_os(os: &str) -> Result<Self, SessionError> {
        match os {
            "windows" => Ok(Self::TunnelService),
            "linux" | "macos" => Ok(Self::WgQuick),
            other => Err(SessionError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// Builds the concrete invocations for one managed interface
#[derive(Debug, Clone)]
pub struct PlatformCommands {
    family: CommandFamily,
    interface: String,
    elevate: bool,
    link_fallback: bool,
}

impl PlatformCommands {
    pub fn new(family: CommandFamily, interface: impl Into<String>, elevate: bool) -> Self {
        Self {
            family,
            interface: interface.into(),
            // Elevation only exists for the unix family
            elevate: elevate && family == CommandFamily::WgQuick,
            link_fallback: family == CommandFamily::WgQuick && cfg!(target_os = "linux"),
        }
    }

    pub fn family(&self) -> CommandFamily {
        self.family
    }

    /// Name of the managed interface
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Start the tunnel from a staged configuration file
    pub fn bring_up(&self, artifact: &Path) -> Invocation {
        let path = artifact.display().to_string();
        match self.family {
            CommandFamily::TunnelService => {
                Invocation::new("wireguard.exe").args(["/installtunnelservice".to_string(), path])
            }
            CommandFamily::WgQuick => self.privileged("wg-quick").args(["up".to_string(), path]),
        }
    }

    /// Stop the tunnel, by staged path when there is one and by name otherwise
    pub fn tear_down(&self, artifact: Option<&Path>) -> Invocation {
        match self.family {
            CommandFamily::TunnelService => Invocation::new("wireguard.exe")
                .args(["/uninstalltunnelservice", self.interface.as_str()]),
            CommandFamily::WgQuick => {
                let target = artifact
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| self.interface.clone());
                self.privileged("wg-quick").args(["down".to_string(), target])
            }
        }
    }

    /// Delete the interface outright, for when `wg-quick down <iface>` has
    /// no configuration to work from
    pub fn delete_interface(&self) -> Option<Invocation> {
        self.link_fallback.then(|| {
            self.privileged("ip")
                .args(["link", "delete", "dev", self.interface.as_str()])
        })
    }

    /// List running tunnels
    pub fn status_query(&self) -> Invocation {
        if self.elevate {
            Invocation::new("sudo").args(["-n", "wg", "show"])
        } else {
            Invocation::new("wg").arg("show")
        }
    }

    fn privileged(&self, program: &str) -> Invocation {
        if self.elevate {
            Invocation::new("sudo").arg(program)
        } else {
            Invocation::new(program)
        }
    }
}

/// Does a `wg show` listing contain `interface`?
///
/// Matches whole `interface: <name>` lines so `wg0` does not match `wg01`.
pub fn interface_listed(listing: &str, interface: &str) -> bool {
    listing.lines().any(|line| {
        line.trim()
            .strip_prefix("interface:")
            .is_some_and(|name| name.trim() == interface)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_detection() {
        assert_eq!(CommandFamily::for_os("windows").unwrap(), CommandFamily::TunnelService);
        assert_eq!(CommandFamily::for_os("linux").unwrap(), CommandFamily::WgQuick);
        assert_eq!(CommandFamily::for_os("macos").unwrap(), CommandFamily::WgQuick);
        assert!(matches!(
            CommandFamily::for_os("freebsd"),
            Err(SessionError::UnsupportedPlatform(os)) if os == "freebsd"
        ));
    }

    #[test]
    fn test_wg_quick_commands() {
        let cmds = PlatformCommands::new(CommandFamily::WgQuick, "wg0", true);
        let path = Path::new("/tmp/wgkit-abc/wg0.conf");

        let up = cmds.bring_up(path);
        assert_eq!(up.program, "sudo");
        assert_eq!(up.args, vec!["wg-quick", "up", "/tmp/wgkit-abc/wg0.conf"]);

        assert_eq!(cmds.tear_down(Some(path)).args, vec!["wg-quick", "down", "/tmp/wgkit-abc/wg0.conf"]);
        assert_eq!(cmds.tear_down(None).args, vec!["wg-quick", "down", "wg0"]);
        assert_eq!(cmds.status_query().args, vec!["-n", "wg", "show"]);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_delete_interface_fallback() {
        let cmds = PlatformCommands::new(CommandFamily::WgQuick, "wg0", true);
        let delete = cmds.delete_interface().unwrap();
        assert_eq!(delete.program, "sudo");
        assert_eq!(delete.args, vec!["ip", "link", "delete", "dev", "wg0"]);

        let cmds = PlatformCommands::new(CommandFamily::WgQuick, "wg0", false);
        assert_eq!(cmds.delete_interface().unwrap().program, "ip");
    }

    #[test]
    fn test_unelevated_commands() {
        let cmds = PlatformCommands::new(CommandFamily::WgQuick, "wg0", false);

        assert_eq!(cmds.bring_up(Path::new("/x/wg0.conf")).program, "wg-quick");
        assert_eq!(cmds.status_query().program, "wg");
        assert_eq!(cmds.status_query().args, vec!["show"]);
    }

    #[test]
    fn test_tunnel_service_commands() {
        // Elevation is ignored for the Windows family
        let cmds = PlatformCommands::new(CommandFamily::TunnelService, "wg0", true);

        let up = cmds.bring_up(Path::new("C:\\Temp\\wgkit-1\\wg0.conf"));
        assert_eq!(up.program, "wireguard.exe");
        assert_eq!(up.args[0], "/installtunnelservice");

        let down = cmds.tear_down(Some(Path::new("C:\\Temp\\wgkit-1\\wg0.conf")));
        assert_eq!(down.args, vec!["/uninstalltunnelservice", "wg0"]);
        assert!(cmds.delete_interface().is_none());
        assert_eq!(cmds.status_query().program, "wg");
    }

    #[test]
    fn test_interface_listing() {
        let listing = "interface: wg0\n  public key: abc=\n  listening port: 51820\n\ninterface: wg1\n";

        assert!(interface_listed(listing, "wg0"));
        assert!(interface_listed(listing, "wg1"));
        assert!(!interface_listed(listing, "wg"));
        assert!(!interface_listed("interface: wg01\n", "wg0"));
        assert!(!interface_listed("", "wg0"));
    }
}
