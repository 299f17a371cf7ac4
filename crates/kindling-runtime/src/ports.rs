use crate::RuntimeError;
use std::net::TcpListener;

/// Resolve a requested host port, asking the OS for a free one when it is zero.
pub fn port_or_free(port: i32, listen_address: &str) -> Result<u16, RuntimeError> {
    if port != 0 {
        return u16::try_from(port)
            .map_err(|_| RuntimeError::ExecFailed(format!("port {port} out of range")));
    }
    let listener = TcpListener::bind((listen_address, 0))?;
    Ok(listener.local_addr()?.port())
}

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: impl std::fmt::Display) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
