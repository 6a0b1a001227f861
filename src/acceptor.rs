use crate::config::ServerConfig;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// How long a closing socket may linger to flush unsent data
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

/// The listening socket
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Bind and listen according to `config`
    pub fn bind(config: &ServerConfig) -> io::Result<Self> {
        let socket_addr = config
            .socket_address()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "No socket addresses found")
            })?;

        let socket = Self::create_socket(&socket_addr, config)?;

        Ok(Self {
            listener: socket.into(),
        })
    }

    /// Accept one pending connection as a non-blocking stream
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn create_socket(addr: &SocketAddr, config: &ServerConfig) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        // Accepted sockets inherit linger from the listener
        if config.opt_linger {
            socket.set_linger(Some(LINGER_TIMEOUT))?;
        }
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        socket.bind(&SockAddr::from(*addr))?;
        socket.listen(config.backlog_size as i32)?;

        Ok(socket)
    }
}

impl AsRawFd for Acceptor {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
