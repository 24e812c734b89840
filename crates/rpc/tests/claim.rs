use std::{ops::Range, sync::Arc};

use attestor_rpc::{
    connect,
    msg::{
        ClaimData, ClaimTunnel, ClaimTunnelRequest, ClaimTunnelResponse, CreateTunnel,
        CreateTunnelRequest, CreateTunnelResponse, DisconnectTunnel, DisconnectTunnelRequest,
        DisconnectTunnelResponse, TranscriptMessage, TranscriptSender,
    },
    Connection, ConnectionConfig, ErrorCode, Event, Events, IncomingRequest, Request, Response,
    RpcError,
};
use attestor_zk::{
    mock::{self, IdealZkOperator},
    redact::REDACTION_CHAR,
    Block, Prepared, Revealed, ZkConfig, ZkProver, ZkVerifier,
};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

const TUNNEL_ID: u32 = 1;
const TOKEN: &[u8] = b"secret-token";
const REQUEST: &[u8] = b"GET /profile HTTP/1.1\r\nHost: example.com\r\nAuthorization: Bearer secret-token\r\nConnection: close\r\n\r\n";
const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"name\":\"alice\"}";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn hide_token(plaintext: &[u8]) -> Vec<Range<usize>> {
    plaintext
        .windows(TOKEN.len())
        .position(|window| window == TOKEN)
        .map(|start| vec![start..start + TOKEN.len()])
        .unwrap_or_default()
}

async fn verify_claim(
    verifier: &ZkVerifier,
    request: ClaimTunnelRequest,
) -> Result<ClaimTunnelResponse, RpcError> {
    if request.tunnel_id != TUNNEL_ID {
        return Err(RpcError::bad_request("unknown tunnel"));
    }

    let mut revealed = Vec::with_capacity(request.transcript.len());
    for message in &request.transcript {
        let plaintext = match verifier
            .verify_reveal(&message.message, &message.reveal)
            .await?
        {
            Revealed::Direct(reveal) => mock::encrypt(&reveal.key, &reveal.iv, &message.message),
            Revealed::Redacted(plaintext) => plaintext,
        };
        revealed.push(plaintext);
    }

    Ok(ClaimTunnelResponse {
        claim: ClaimData {
            provider: request.provider,
            parameters: request.parameters,
            timestamp_s: request.timestamp_s,
        },
        revealed,
    })
}

async fn serve(conn: Connection, mut events: Events) {
    let verifier = ZkVerifier::new(ZkConfig::default(), Arc::new(IdealZkOperator::default()));

    conn.send_init_response().await.unwrap();

    while let Some(event) = events.next().await {
        match event {
            Event::Request(IncomingRequest {
                request, responder, ..
            }) => {
                let response = match request {
                    Request::CreateTunnel(_) => Ok(CreateTunnelResponse::default().into()),
                    Request::DisconnectTunnel(_) => Ok(DisconnectTunnelResponse::default().into()),
                    Request::ClaimTunnel(request) => verify_claim(&verifier, request)
                        .await
                        .map(Response::from),
                };
                responder.respond(response).await.unwrap();
            }
            // Echo, standing in for the server behind the tunnel.
            Event::TlsMessage(message) => conn
                .send_tls_message(message.tunnel_id, message.message)
                .await
                .unwrap(),
            Event::InitResponse => {}
            Event::Terminated(_) => break,
        }
    }
}

fn setup() -> (Connection, Events) {
    init_tracing();

    let config = ConnectionConfig::default();
    let (client_io, server_io) = tokio::io::duplex(1 << 16);

    let (server, server_task, server_events) = connect(server_io, &config);
    tokio::spawn(server_task.run());
    tokio::spawn(serve(server, server_events));

    let (client, client_task, client_events) = connect(client_io, &config);
    tokio::spawn(client_task.run());

    (client, client_events)
}

async fn claim_request() -> (ClaimTunnelRequest, Prepared) {
    let prover = ZkProver::new(ZkConfig::default(), Arc::new(IdealZkOperator::default()));

    let mut blocks = vec![mock::block(REQUEST), mock::block(RESPONSE)];
    let prepared = prover.prepare(&mut blocks, hide_token).await.unwrap();

    let transcript = blocks
        .iter()
        .zip([TranscriptSender::Client, TranscriptSender::Server])
        .map(|(block, sender): (&Block, _)| TranscriptMessage {
            sender,
            message: block.ciphertext().to_vec(),
            reveal: block.to_reveal(),
        })
        .collect();

    let request = ClaimTunnelRequest {
        tunnel_id: TUNNEL_ID,
        provider: "http".to_string(),
        parameters: "{\"url\":\"https://example.com/profile\"}".to_string(),
        transcript,
        timestamp_s: 1_700_000_000,
    };

    (request, prepared)
}

#[tokio::test]
async fn test_claim_tunnel() {
    let (client, mut events) = setup();

    client.wait_for_init().await.unwrap();

    client
        .rpc::<CreateTunnel>(CreateTunnelRequest {
            id: TUNNEL_ID,
            host: "example.com".to_string(),
            port: 443,
        })
        .await
        .unwrap();

    client
        .send_tls_message(TUNNEL_ID, b"client hello".to_vec())
        .await
        .unwrap();
    let Some(Event::TlsMessage(echo)) = events.next().await else {
        panic!("expected tls message");
    };
    assert_eq!(echo.message, b"client hello");

    let (request, prepared) = claim_request().await;
    assert!(matches!(prepared, Prepared::Proved { ref blocks, .. } if *blocks == [0usize]));
    assert!(request.transcript[0].reveal.direct_reveal.is_none());
    assert!(request.transcript[1].reveal.zk_reveal.is_none());

    let response = client.rpc::<ClaimTunnel>(request).await.unwrap();
    assert_eq!(response.claim.provider, "http");
    assert_eq!(response.claim.timestamp_s, 1_700_000_000);

    let hidden = hide_token(REQUEST).remove(0);
    let revealed = &response.revealed[0];
    assert_eq!(revealed.len(), REQUEST.len());
    assert!(revealed[hidden.clone()].iter().all(|&b| b == REDACTION_CHAR));
    assert_eq!(&revealed[..hidden.start], &REQUEST[..hidden.start]);
    assert_eq!(&revealed[hidden.end..], &REQUEST[hidden.end..]);
    assert_eq!(response.revealed[1], RESPONSE);

    client
        .rpc::<DisconnectTunnel>(DisconnectTunnelRequest { id: TUNNEL_ID })
        .await
        .unwrap();

    client.terminate(None);
    assert!(client.is_terminated());
}

#[tokio::test]
async fn test_claim_tampered() {
    let (client, _events) = setup();

    client.wait_for_init().await.unwrap();

    let (mut request, _) = claim_request().await;
    let proof = &mut request.transcript[0]
        .reveal
        .zk_reveal
        .as_mut()
        .unwrap()
        .proofs[0];
    proof.redacted_plaintext[0] ^= 1;

    let err = client.rpc::<ClaimTunnel>(request).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidClaim);

    // A rejected claim leaves the connection usable.
    assert!(!client.is_terminated());
}

#[tokio::test]
async fn test_claim_without_reveal() {
    let (client, _events) = setup();

    let (mut request, _) = claim_request().await;
    request.transcript[1].reveal.direct_reveal = None;

    let err = client.rpc::<ClaimTunnel>(request).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidClaim);
}
