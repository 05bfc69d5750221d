use anyhow::{Result, anyhow};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Socket capability level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCapability {
    /// Full raw socket access - receives Time Exceeded from routers
    Raw,
    /// Unprivileged ICMP socket (limited functionality)
    Dgram,
}

/// Socket with metadata about type (for DGRAM-aware parsing)
#[derive(Debug)]
pub struct SocketInfo {
    pub socket: Socket,
    /// True if SOCK_DGRAM (no IP header in received packets)
    pub is_dgram: bool,
}

/// Send and receive sockets for echo probes
#[derive(Debug)]
pub struct ProbeSockets {
    pub send: SocketInfo,
    /// Separate receive socket; `None` means replies arrive on `send`
    pub recv: Option<SocketInfo>,
}

impl ProbeSockets {
    pub fn recv(&self) -> &SocketInfo {
        self.recv.as_ref().unwrap_or(&self.send)
    }
}

/// Check socket permissions and return capability level
/// On macOS, requires RAW socket for receiving ICMP Time Exceeded messages
/// (DGRAM sockets only receive Echo Reply, not error messages from routers)
#[cfg(target_os = "macos")]
pub fn check_permissions() -> Result<SocketCapability> {
    if create_raw_icmp_socket().is_err() {
        return Err(anyhow!(
            "Insufficient permissions for ICMP sockets.\n\n\
             On macOS, raw sockets are required to receive ICMP Time Exceeded\n\
             messages from intermediate routers.\n\n\
             Fix: Run with sudo: sudo hoptrace <target>"
        ));
    }

    if create_dgram_icmp_socket().is_err() {
        return Err(anyhow!(
            "Failed to create ICMP socket for sending.\n\n\
             Fix: Run with sudo: sudo hoptrace <target>"
        ));
    }

    Ok(SocketCapability::Raw)
}

/// Check socket permissions and return capability level
/// On Linux, prefers RAW for full functionality
#[cfg(not(target_os = "macos"))]
pub fn check_permissions() -> Result<SocketCapability> {
    // Try raw socket first (full functionality)
    if create_raw_icmp_socket().is_ok() {
        return Ok(SocketCapability::Raw);
    }

    // Try unprivileged ICMP (SOCK_DGRAM with IPPROTO_ICMP)
    if create_dgram_icmp_socket().is_ok() {
        log::warn!(
            "Using unprivileged ICMP sockets; intermediate hops may show as timeouts"
        );
        return Ok(SocketCapability::Dgram);
    }

    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "hoptrace".to_string());

    Err(anyhow!(
        "Insufficient permissions for raw sockets.\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo hoptrace <target>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}\n\
         \u{2022} Enable unprivileged ICMP: sudo sysctl -w net.ipv4.ping_group_range='0 65534'",
        binary_path
    ))
}

/// Create a raw ICMPv4 socket
pub fn create_raw_icmp_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Create an unprivileged ICMPv4 socket (SOCK_DGRAM)
/// This socket type allows IP_TTL to be set on macOS
pub fn create_dgram_icmp_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Open the sockets used for probing
/// On macOS, sends on DGRAM (supports IP_TTL) and receives on RAW
/// On Linux, one socket does both: RAW if permitted, DGRAM otherwise
pub fn open_probe_sockets() -> Result<ProbeSockets> {
    #[cfg(target_os = "macos")]
    {
        let send = create_dgram_icmp_socket()?;
        let recv = create_raw_icmp_socket()?;
        return Ok(ProbeSockets {
            send: SocketInfo {
                socket: send,
                is_dgram: true,
            },
            recv: Some(SocketInfo {
                socket: recv,
                is_dgram: false,
            }),
        });
    }

    #[cfg(not(target_os = "macos"))]
    {
        if let Ok(socket) = create_raw_icmp_socket() {
            return Ok(ProbeSockets {
                send: SocketInfo {
                    socket,
                    is_dgram: false,
                },
                recv: None,
            });
        }
        // DGRAM fallback for unprivileged users (ping_group_range)
        let socket = create_dgram_icmp_socket()?;
        Ok(ProbeSockets {
            send: SocketInfo {
                socket,
                is_dgram: true,
            },
            recv: None,
        })
    }
}

/// Set TTL on a socket
pub fn set_ttl(socket: &Socket, ttl: u8) -> Result<()> {
    socket.set_ttl(ttl as u32)?;
    Ok(())
}

/// Set or clear the Don't Fragment flag
/// Sets IP_MTU_DISCOVER = IP_PMTUDISC_DO (always set DF bit) or IP_PMTUDISC_DONT
#[cfg(target_os = "linux")]
pub fn set_dont_fragment(socket: &Socket, enabled: bool) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // IP_MTU_DISCOVER = 10, IP_PMTUDISC_DONT = 0, IP_PMTUDISC_DO = 2 on Linux
    const IP_MTU_DISCOVER: libc::c_int = 10;
    const IP_PMTUDISC_DONT: libc::c_int = 0;
    const IP_PMTUDISC_DO: libc::c_int = 2;
    let val: libc::c_int = if enabled { IP_PMTUDISC_DO } else { IP_PMTUDISC_DONT };
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            IP_MTU_DISCOVER,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Set or clear the Don't Fragment flag (macOS)
#[cfg(target_os = "macos")]
pub fn set_dont_fragment(socket: &Socket, enabled: bool) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // IP_DONTFRAG = 28 on macOS
    const IP_DONTFRAG: libc::c_int = 28;
    let val: libc::c_int = enabled as libc::c_int;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            IP_DONTFRAG,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn set_dont_fragment(_socket: &Socket, enabled: bool) -> Result<()> {
    if enabled {
        log::debug!("Don't Fragment is not supported on this platform, sending without it");
    }
    Ok(())
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> Result<usize> {
    let addr = SocketAddr::new(target, 0);
    let sock_addr = SockAddr::from(addr);
    let sent = socket.send_to(packet, &sock_addr)?;
    Ok(sent)
}

/// Result of receiving an ICMP packet
#[derive(Debug)]
pub struct RecvResult {
    pub len: usize,
    pub source: IpAddr,
}

/// Receive one ICMP packet, waiting at most `timeout`
pub fn recv_icmp(socket: &Socket, buffer: &mut [u8], timeout: Duration) -> Result<RecvResult> {
    // A zero timeval means "block forever" to the kernel
    socket.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

    // SAFETY: recv_from only writes initialized bytes and reports how many
    let uninit = unsafe { &mut *(buffer as *mut [u8] as *mut [MaybeUninit<u8>]) };
    let (len, addr) = socket.recv_from(uninit)?;

    let source = addr
        .as_socket()
        .map(|s| s.ip())
        .ok_or_else(|| anyhow!("Unknown address family: {:?}", addr.family()))?;

    Ok(RecvResult { len, source })
}

/// True if the error is a read timeout rather than a socket failure
pub fn is_timeout(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>().is_some_and(|io| {
        io.kind() == std::io::ErrorKind::WouldBlock || io.kind() == std::io::ErrorKind::TimedOut
    })
}
