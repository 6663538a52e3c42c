use gbn_transfer::client::{Client, Transfer};
use gbn_transfer::config::TransferConfig;
use gbn_transfer::document_source::InMemorySource;
use gbn_transfer::impairment::ImpairmentConfig;
use gbn_transfer::server::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::Level;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

fn document(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn start_server(config: TransferConfig, documents: InMemorySource) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(Server::bind(SocketAddr::from(([127, 0, 0, 1], 0)), Arc::new(config), Arc::new(documents)).await.unwrap());
    let addr = server.local_addr().unwrap();

    let server_clone = server.clone();
    tokio::spawn(async move { server_clone.recv_loop().await });
    (server, addr)
}

async fn fetch(server_addr: SocketAddr, config: TransferConfig, name: &str) -> anyhow::Result<Transfer> {
    let client = Client::connect(server_addr, Arc::new(config)).await?;
    timeout(Duration::from_secs(30), client.fetch(name)).await?
}

async fn wait_until_idle(server: &Server) {
    timeout(Duration::from_secs(10), async {
        while server.num_active_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }).await.unwrap();
}

fn small_packets() -> TransferConfig {
    TransferConfig {
        packet_size: 10,
        ..TransferConfig::default()
    }
}

#[tokio::test]
async fn test_ten_bytes_in_two_packets() {
    let (server, addr) = start_server(small_packets(), InMemorySource::default().with_document("abc.txt", "ABCDEFGHIJ")).await;

    let transfer = fetch(addr, small_packets(), "abc.txt").await.unwrap();
    assert_eq!(transfer.content, b"ABCDEFGHIJ");
    assert_eq!(transfer.stats.packets_received, 2);
    assert_eq!(transfer.stats.checksum_errors, 0);
    assert_eq!(transfer.stats.corruption_rate(), 0.0);

    wait_until_idle(&server).await;
}

#[tokio::test]
async fn test_empty_document() {
    let (_server, addr) = start_server(small_packets(), InMemorySource::default().with_document("empty", "")).await;

    let transfer = fetch(addr, small_packets(), "empty").await.unwrap();
    assert!(transfer.content.is_empty());
    assert_eq!(transfer.stats.packets_received, 0);
}

#[tokio::test]
async fn test_longer_than_sequence_space() {
    let config = || TransferConfig {
        packet_size: 20,
        window_size: 8,
        sequence_modulus: 16,
        ..TransferConfig::default()
    };
    let doc = document(16 * 200 + 7);
    let (_server, addr) = start_server(config(), InMemorySource::default().with_document("big", doc.clone())).await;

    let transfer = fetch(addr, config(), "big").await.unwrap();
    assert_eq!(transfer.content, doc);
    assert_eq!(transfer.stats.checksum_errors, 0);
}

#[tokio::test]
async fn test_impaired_server_link() {
    let config = || TransferConfig {
        packet_size: 64,
        window_size: 8,
        impairment: ImpairmentConfig::new(0.2, 0.2, 0.1, Duration::from_millis(5)).with_seed(17),
        ..TransferConfig::default()
    };
    let doc = document(60 * 100);
    let (server, addr) = start_server(config(), InMemorySource::default().with_document("lossy", doc.clone())).await;

    let client_config = TransferConfig {
        impairment: ImpairmentConfig::default(),
        ..config()
    };
    let transfer = fetch(addr, client_config, "lossy").await.unwrap();
    assert_eq!(transfer.content, doc);
    assert!(transfer.stats.packets_received >= 100);

    wait_until_idle(&server).await;
}

#[tokio::test]
async fn test_impaired_feedback_link() {
    let doc = document(3000);
    let (server, addr) = start_server(small_packets(), InMemorySource::default().with_document("doc", doc.clone())).await;

    let client_config = TransferConfig {
        impairment: ImpairmentConfig::new(0.0, 0.3, 0.0, Duration::ZERO).with_seed(5),
        ..small_packets()
    };
    let transfer = fetch(addr, client_config, "doc").await.unwrap();
    assert_eq!(transfer.content, doc);
    assert_eq!(transfer.stats.checksum_errors, 0);

    wait_until_idle(&server).await;
}

#[tokio::test]
async fn test_without_nak() {
    let config = || TransferConfig {
        packet_size: 32,
        nak_enabled: false,
        impairment: ImpairmentConfig::new(0.3, 0.0, 0.0, Duration::ZERO).with_seed(3),
        ..TransferConfig::default()
    };
    let doc = document(2000);
    let (_server, addr) = start_server(config(), InMemorySource::default().with_document("doc", doc.clone())).await;

    let client_config = TransferConfig {
        impairment: ImpairmentConfig::default(),
        ..config()
    };
    let transfer = fetch(addr, client_config, "doc").await.unwrap();
    assert_eq!(transfer.content, doc);
    assert!(transfer.stats.checksum_errors > 0);
}

#[tokio::test]
async fn test_link_that_corrupts_everything_is_given_up() {
    let server_config = TransferConfig {
        max_retries: 5,
        impairment: ImpairmentConfig::new(1.0, 0.0, 0.0, Duration::ZERO).with_seed(1),
        ..small_packets()
    };
    let (server, addr) = start_server(server_config, InMemorySource::default().with_document("doc", "ABCDEFGHIJ")).await;

    let client_config = TransferConfig {
        idle_timeout: Duration::from_secs(1),
        ..small_packets()
    };
    assert!(fetch(addr, client_config, "doc").await.is_err());

    wait_until_idle(&server).await;
}

#[tokio::test]
async fn test_missing_document_does_not_stop_server() {
    let (_server, addr) = start_server(small_packets(), InMemorySource::default().with_document("there", "here it is")).await;

    let err = fetch(addr, small_packets(), "not-there").await.unwrap_err();
    assert!(err.to_string().contains("404"));

    let transfer = fetch(addr, small_packets(), "there").await.unwrap();
    assert_eq!(transfer.content, b"here it is");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients() {
    let documents = (0..5)
        .fold(InMemorySource::default(), |source, i| source.with_document(&format!("doc{}", i), document(500 + 300 * i)));
    let (server, addr) = start_server(small_packets(), documents).await;

    let mut transfers = Vec::new();
    for i in 0..5 {
        transfers.push(tokio::spawn(async move {
            let transfer = fetch(addr, small_packets(), &format!("doc{}", i)).await.unwrap();
            assert_eq!(transfer.content, document(500 + 300 * i));
        }));
    }
    for transfer in transfers {
        transfer.await.unwrap();
    }

    wait_until_idle(&server).await;
}
