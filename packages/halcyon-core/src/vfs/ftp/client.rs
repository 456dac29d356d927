//! Control-channel client.
//!
//! One `FtpClient` owns one control connection. Transfers run in passive
//! mode; the address a server advertises in its PASV reply is ignored in
//! favor of the control connection's peer, since NAT'd servers routinely
//! announce unreachable private addresses. Only the port is taken.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::FtpConfig;
use crate::url::VfsUrl;
use crate::vfs::{VfsError, VfsResult};

/// A parsed control-channel reply: three-digit code plus joined text lines.
#[derive(Debug)]
pub(super) struct Reply {
    pub code: u16,
    pub text: String,
}

pub(super) async fn io_timeout<T, F>(duration: Duration, what: &str, fut: F) -> VfsResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(VfsError::Io(err)),
        Err(_) => Err(VfsError::Unavailable(format!("FTP {} timed out", what))),
    }
}

pub(super) struct FtpClient {
    stream: BufReader<TcpStream>,
    peer_ip: IpAddr,
    control_timeout: Duration,
    data_timeout: Duration,
}

impl FtpClient {
    /// Dials the server, logs in and switches to binary mode.
    ///
    /// Credentials come from the URL; missing ones fall back to anonymous
    /// with the configured courtesy password.
    pub async fn connect(url: &VfsUrl, config: &FtpConfig) -> VfsResult<FtpClient> {
        if url.host().is_empty() {
            return Err(VfsError::Protocol("FTP URL carries no host".to_string()));
        }
        let control_timeout = Duration::from_secs(config.control_timeout_secs);
        let port = url.port_or(21);

        let stream = io_timeout(
            control_timeout,
            "connect",
            TcpStream::connect((url.host().to_string(), port)),
        )
        .await?;
        let peer_ip = stream.peer_addr()?.ip();
        log::debug!("[Ftp] Connected to {}:{}", url.host(), port);

        let mut client = FtpClient {
            stream: BufReader::new(stream),
            peer_ip,
            control_timeout,
            data_timeout: Duration::from_secs(config.data_timeout_secs),
        };

        let greeting = client.read_reply().await?;
        if greeting.code != 220 {
            return Err(VfsError::Unavailable(format!(
                "FTP server refused connection: {} {}",
                greeting.code, greeting.text
            )));
        }

        let user = if url.username().is_empty() {
            "anonymous"
        } else {
            url.username()
        };
        let reply = client.command(&format!("USER {}", user)).await?;
        match reply.code {
            230 => {}
            331 | 332 => {
                let password = if url.password().is_empty() {
                    config.anonymous_password.as_str()
                } else {
                    url.password()
                };
                let reply = client.command(&format!("PASS {}", password)).await?;
                if reply.code != 230 {
                    return Err(VfsError::Unavailable(format!(
                        "FTP login failed: {} {}",
                        reply.code, reply.text
                    )));
                }
            }
            _ => {
                return Err(VfsError::Unavailable(format!(
                    "FTP login rejected: {} {}",
                    reply.code, reply.text
                )))
            }
        }

        client.expect("TYPE I", &[200]).await?;
        Ok(client)
    }

    /// Runs LIST over a fresh data connection, returning the raw lines.
    pub async fn list(&mut self, path: &str) -> VfsResult<Vec<String>> {
        let mut data = self.open_data().await?;
        let cmd = if path.is_empty() || path == "/" {
            "LIST".to_string()
        } else {
            format!("LIST {}", path)
        };
        let reply = self.command(&cmd).await?;
        match reply.code {
            125 | 150 => {}
            550 => return Err(VfsError::NotFound(path.to_string())),
            _ => {
                return Err(VfsError::Protocol(format!(
                    "LIST refused: {} {}",
                    reply.code, reply.text
                )))
            }
        }

        let mut raw = Vec::new();
        io_timeout(self.data_timeout, "LIST transfer", data.read_to_end(&mut raw)).await?;
        drop(data);
        self.finish_transfer().await;

        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Starts a RETR transfer at `offset`, returning the data stream.
    pub async fn open_retr(&mut self, path: &str, offset: u64) -> VfsResult<TcpStream> {
        let data = self.open_data().await?;
        if offset > 0 {
            self.expect(&format!("REST {}", offset), &[350]).await?;
        }
        let reply = self.command(&format!("RETR {}", path)).await?;
        match reply.code {
            125 | 150 => Ok(data),
            550 => Err(VfsError::NotFound(path.to_string())),
            _ => Err(VfsError::Protocol(format!(
                "RETR refused: {} {}",
                reply.code, reply.text
            ))),
        }
    }

    /// Reads the reply that closes a data transfer. Best effort.
    pub async fn finish_transfer(&mut self) {
        match self.read_reply().await {
            Ok(reply) if matches!(reply.code, 226 | 250) => {}
            Ok(reply) => log::debug!("[Ftp] Transfer close reply {} {}", reply.code, reply.text),
            Err(err) => log::debug!("[Ftp] No transfer close reply: {}", err),
        }
    }

    /// File size in binary mode, or None where the server cannot say.
    pub async fn size(&mut self, path: &str) -> VfsResult<Option<u64>> {
        let reply = self.command(&format!("SIZE {}", path)).await?;
        match reply.code {
            213 => Ok(reply.text.trim().parse().ok()),
            _ => Ok(None),
        }
    }

    /// Whether the server accepts `path` as a working directory.
    pub async fn cwd(&mut self, path: &str) -> VfsResult<bool> {
        let reply = self.command(&format!("CWD {}", path)).await?;
        match reply.code {
            250 => Ok(true),
            550 => Ok(false),
            _ => {
                log::debug!("[Ftp] CWD reply {} {}", reply.code, reply.text);
                Ok(false)
            }
        }
    }

    pub async fn mkd(&mut self, path: &str) -> VfsResult<()> {
        let reply = self.command(&format!("MKD {}", path)).await?;
        match reply.code {
            257 | 250 => Ok(()),
            _ => Err(VfsError::Protocol(format!(
                "MKD failed: {} {}",
                reply.code, reply.text
            ))),
        }
    }

    pub async fn rmd(&mut self, path: &str) -> VfsResult<()> {
        let reply = self.command(&format!("RMD {}", path)).await?;
        match reply.code {
            250 => Ok(()),
            550 => Err(VfsError::NotFound(path.to_string())),
            _ => Err(VfsError::Protocol(format!(
                "RMD failed: {} {}",
                reply.code, reply.text
            ))),
        }
    }

    pub async fn dele(&mut self, path: &str) -> VfsResult<()> {
        let reply = self.command(&format!("DELE {}", path)).await?;
        match reply.code {
            250 => Ok(()),
            550 => Err(VfsError::NotFound(path.to_string())),
            _ => Err(VfsError::Protocol(format!(
                "DELE failed: {} {}",
                reply.code, reply.text
            ))),
        }
    }

    /// Polite teardown. Errors are ignored; the connection closes either way.
    pub async fn quit(mut self) {
        if self.send_line("QUIT").await.is_ok() {
            let _ = self.read_reply().await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Wire plumbing
    // ─────────────────────────────────────────────────────────────────────

    async fn open_data(&mut self) -> VfsResult<TcpStream> {
        let reply = self.expect("PASV", &[227]).await?;
        let port = parse_pasv_port(&reply.text).ok_or_else(|| {
            VfsError::Protocol(format!("unparseable PASV reply: {}", reply.text))
        })?;
        let addr = SocketAddr::new(self.peer_ip, port);
        io_timeout(self.data_timeout, "data connect", TcpStream::connect(addr)).await
    }

    async fn expect(&mut self, cmd: &str, accept: &[u16]) -> VfsResult<Reply> {
        let reply = self.command(cmd).await?;
        if accept.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(VfsError::Protocol(format!(
                "{} failed: {} {}",
                cmd.split_whitespace().next().unwrap_or(cmd),
                reply.code,
                reply.text
            )))
        }
    }

    async fn command(&mut self, cmd: &str) -> VfsResult<Reply> {
        self.send_line(cmd).await?;
        self.read_reply().await
    }

    async fn send_line(&mut self, line: &str) -> VfsResult<()> {
        if line.starts_with("PASS ") {
            log::trace!("[Ftp] > PASS ****");
        } else {
            log::trace!("[Ftp] > {}", line);
        }
        let framed = format!("{}\r\n", line);
        io_timeout(
            self.control_timeout,
            "send",
            self.stream.write_all(framed.as_bytes()),
        )
        .await
    }

    async fn read_reply(&mut self) -> VfsResult<Reply> {
        let first = self.read_line().await?;
        let code: u16 = first
            .get(..3)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| VfsError::Protocol(format!("malformed FTP reply: {:?}", first)))?;
        let mut text = first.get(4..).unwrap_or("").trim_end().to_string();

        // Multiline replies run until "<code><space>".
        if first.as_bytes().get(3) == Some(&b'-') {
            loop {
                let line = self.read_line().await?;
                let trimmed = line.trim_end();
                let tagged = trimmed.len() >= 4 && trimmed.starts_with(&first[..3]);
                let done = tagged && trimmed.as_bytes()[3] == b' ';
                let body = if tagged { &trimmed[4..] } else { trimmed };
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(body);
                if done {
                    break;
                }
            }
        }

        log::trace!("[Ftp] < {} {}", code, text.lines().next().unwrap_or(""));
        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> VfsResult<String> {
        let mut line = String::new();
        let n = io_timeout(
            self.control_timeout,
            "reply",
            self.stream.read_line(&mut line),
        )
        .await?;
        if n == 0 {
            return Err(VfsError::Unavailable(
                "FTP control connection closed".to_string(),
            ));
        }
        Ok(line)
    }
}

/// Extracts the data port from a PASV reply.
///
/// Tolerant of missing parentheses: takes the last six numbers in the text.
fn parse_pasv_port(text: &str) -> Option<u16> {
    let nums: Vec<u16> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u16>().ok())
        .collect();
    if nums.len() < 6 {
        return None;
    }
    let tail = &nums[nums.len() - 6..];
    if tail[4] > 255 || tail[5] > 255 {
        return None;
    }
    Some(tail[4] * 256 + tail[5])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_port_from_standard_reply() {
        let text = "Entering Passive Mode (192,168,1,10,195,149).";
        assert_eq!(parse_pasv_port(text), Some(195 * 256 + 149));
    }

    #[test]
    fn pasv_port_without_parentheses() {
        assert_eq!(parse_pasv_port("Passive Mode 10,0,0,1,4,1"), Some(1025));
    }

    #[test]
    fn pasv_reply_without_numbers_is_rejected() {
        assert_eq!(parse_pasv_port("Entering Passive Mode"), None);
        assert_eq!(parse_pasv_port("ok (1,2,3)"), None);
    }

    #[test]
    fn pasv_out_of_range_octets_are_rejected() {
        assert_eq!(parse_pasv_port("(1,2,3,4,999,1)"), None);
    }
}
