//! Connection greeting: `A<n>H<user>\n` from the client, `LysKOM\n` back.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;
use crate::{latin1_to_string, string_to_latin1};

const SERVER_GREETING: &[u8; 7] = b"LysKOM\n";

/// Longest user string a server-side greeting may carry.
const MAX_GREETING_USER: usize = 1024;

/// Send the client greeting and wait for the server to accept it.
pub async fn client_handshake<S>(stream: &mut S, user: &str) -> Result<(), CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = string_to_latin1(user);
    let mut greeting = format!("A{}H", user.len()).into_bytes();
    greeting.extend_from_slice(&user);
    greeting.push(b'\n');
    stream.write_all(&greeting).await?;
    stream.flush().await?;

    let mut resp = [0u8; 7];
    stream.read_exact(&mut resp).await?;
    if &resp != SERVER_GREETING {
        return Err(CodecError::BadInitialResponse(latin1_to_string(&resp)));
    }
    Ok(())
}

/// Server side of the greeting. Returns the user string the client sent.
pub async fn server_handshake<S>(stream: &mut S) -> Result<String, CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if stream.read_u8().await? != b'A' {
        return Err(CodecError::malformed("client greeting"));
    }
    let mut len = 0usize;
    loop {
        match stream.read_u8().await? {
            b'H' => break,
            d @ b'0'..=b'9' => {
                len = len * 10 + (d - b'0') as usize;
                if len > MAX_GREETING_USER {
                    return Err(CodecError::malformed("client greeting"));
                }
            }
            _ => return Err(CodecError::malformed("client greeting")),
        }
    }
    let mut user = vec![0u8; len];
    stream.read_exact(&mut user).await?;
    if stream.read_u8().await? != b'\n' {
        return Err(CodecError::malformed("client greeting"));
    }
    stream.write_all(SERVER_GREETING).await?;
    stream.flush().await?;
    Ok(latin1_to_string(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_and_server_agree() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let server_task = tokio::spawn(async move { server_handshake(&mut server).await });

        client_handshake(&mut client, "httpkom%gw.example.org")
            .await
            .unwrap();
        let user = server_task.await.unwrap().unwrap();
        assert_eq!(user, "httpkom%gw.example.org");
    }

    #[tokio::test]
    async fn wrong_greeting_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut buf = [0u8; 5];
            let _ = server.read_exact(&mut buf).await;
            let _ = server.write_all(b"NoKOM!\n").await;
        });

        let err = client_handshake(&mut client, "x").await.unwrap_err();
        assert!(matches!(err, CodecError::BadInitialResponse(s) if s == "NoKOM!\n"));
    }

    #[tokio::test]
    async fn closed_connection_is_io_error() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let err = client_handshake(&mut client, "x").await.unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }
}
