//! Linux implementation of the tunnel capability.
//!
//! The builder only records settings. Everything happens on commit: the TUN
//! device is created and brought up, routes and DNS are applied with `ip` and
//! `resolvectl`, and a duplicate of the device descriptor is handed back. If
//! any part of the commit fails the device is dropped, which removes the
//! interface together with its routes.

use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::process::Command;
use std::{io, mem};

use tracing::{debug, info, warn};
use tun::{Configuration, Device, Layer};

use super::provider::{CapabilityError, CapabilityResult, Feature, TunProvider, TunnelBuilder};
use crate::cidr::Cidr;
use crate::config::LinuxSettings;

/// Creates TUN interfaces with the `tun` crate.
#[derive(Debug, Clone, Default)]
pub struct LinuxTunProvider {
    interface_name: Option<String>,
}

impl LinuxTunProvider {
    pub fn new(interface_name: Option<String>) -> Self {
        LinuxTunProvider { interface_name }
    }

    pub fn from_settings(settings: &LinuxSettings) -> Self {
        Self::new(settings.interface_name.clone())
    }
}

impl TunProvider for LinuxTunProvider {
    fn new_builder(&self) -> CapabilityResult<Box<dyn TunnelBuilder>> {
        Ok(Box::new(LinuxTunBuilder {
            interface_name: self.interface_name.clone(),
            ..Default::default()
        }))
    }

    fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::MeteredHint => false,
        }
    }
}

#[derive(Debug, Default)]
struct LinuxTunBuilder {
    interface_name: Option<String>,
    session: String,
    blocking: bool,
    address: Option<(Ipv4Addr, u8)>,
    mtu: Option<u32>,
    dns_servers: Vec<IpAddr>,
    routes: Vec<Cidr>,
}

impl TunnelBuilder for LinuxTunBuilder {
    fn set_session(&mut self, name: &str) -> CapabilityResult<()> {
        self.session = name.to_string();
        Ok(())
    }

    fn set_blocking(&mut self, blocking: bool) -> CapabilityResult<()> {
        self.blocking = blocking;
        Ok(())
    }

    fn add_address(&mut self, address: IpAddr, prefix_len: u8) -> CapabilityResult<()> {
        match address {
            IpAddr::V4(v4) => {
                if self.address.is_some() {
                    return Err(CapabilityError::Unsupported(
                        "more than one interface address".to_string(),
                    ));
                }
                self.address = Some((v4, prefix_len));
                Ok(())
            }
            IpAddr::V6(_) => Err(CapabilityError::Unsupported(
                "IPv6 interface addresses".to_string(),
            )),
        }
    }

    fn set_mtu(&mut self, mtu: u32) -> CapabilityResult<()> {
        if i32::try_from(mtu).is_err() {
            return Err(CapabilityError::Rejected(format!("MTU {} out of range", mtu)));
        }
        self.mtu = Some(mtu);
        Ok(())
    }

    fn add_dns_server(&mut self, server: IpAddr) -> CapabilityResult<()> {
        self.dns_servers.push(server);
        Ok(())
    }

    fn add_route(&mut self, address: IpAddr, prefix_len: u8) -> CapabilityResult<()> {
        let route = Cidr::new(address, prefix_len)
            .map_err(|e| CapabilityError::Rejected(e.to_string()))?;
        self.routes.push(route);
        Ok(())
    }

    fn add_disallowed_application(&mut self, application: &str) -> CapabilityResult<()> {
        Err(CapabilityError::Unsupported(format!(
            "per-application exclusion ({})",
            application
        )))
    }

    fn set_metered(&mut self, _metered: bool) -> CapabilityResult<()> {
        Err(CapabilityError::Unsupported("metered hint".to_string()))
    }

    fn establish(self: Box<Self>) -> CapabilityResult<OwnedFd> {
        let (address, prefix_len) = self
            .address
            .ok_or_else(|| CapabilityError::Rejected("no interface address".to_string()))?;

        let mut config = Configuration::default();
        if let Some(name) = &self.interface_name {
            config.name(name);
        }
        config
            .layer(Layer::L3)
            .address(address)
            .netmask(prefix_to_netmask(prefix_len))
            .up();
        if let Some(mtu) = self.mtu {
            // Range checked in `set_mtu`
            config.mtu(mtu as i32);
        }

        let device = tun::create(&config)
            .map_err(|e| CapabilityError::Rejected(format!("failed to create TUN device: {}", e)))?;
        let name = device.name().to_string();
        info!(
            interface = %name,
            session = %self.session,
            "Created TUN device"
        );

        for route in &self.routes {
            add_route(route, &name)?;
        }

        for server in &self.dns_servers {
            if let Err(e) = set_link_dns(&name, *server) {
                warn!(interface = %name, dns = %server, error = %e, "Failed to set link DNS");
            }
        }

        // SAFETY: the descriptor belongs to `device`, which outlives the borrow.
        let fd = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) }.try_clone_to_owned()?;
        set_nonblocking(fd.as_raw_fd(), !self.blocking)?;

        // The interface stays alive through the duplicate.
        mem::drop(device);
        debug!(interface = %name, fd = fd.as_raw_fd(), "Handing over TUN descriptor");
        Ok(fd)
    }
}

fn prefix_to_netmask(prefix_len: u8) -> Ipv4Addr {
    let bits = u32::MAX
        .checked_shl(32 - u32::from(prefix_len.min(32)))
        .unwrap_or(0);
    Ipv4Addr::from(bits)
}

fn run_command(cmd: &str, args: &[&str]) -> CapabilityResult<String> {
    debug!("Running command: {} {:?}", cmd, args);

    let output = Command::new(cmd).args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CapabilityError::Rejected(format!(
            "{} {} failed with status {}: {}",
            cmd,
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn add_route(route: &Cidr, interface: &str) -> CapabilityResult<()> {
    let destination = route.to_string();
    let family = if route.is_ipv4() { "-4" } else { "-6" };
    run_command(
        "ip",
        &[family, "route", "replace", &destination, "dev", interface],
    )?;
    Ok(())
}

fn set_link_dns(interface: &str, server: IpAddr) -> CapabilityResult<()> {
    let server = server.to_string();
    run_command("resolvectl", &["dns", interface, &server])?;
    Ok(())
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: plain fcntl calls on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(fd, libc::F_SETFL, flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
