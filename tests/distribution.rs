use peershare::config::Settings;
use peershare::network::GroupHub;
use peershare::service::PeerShareDaemon;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;

async fn start_hub() -> (GroupHub, String) {
    let listener = GroupHub::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let hub = GroupHub::new();
    let runner = hub.clone();
    tokio::spawn(async move { runner.run(listener).await });
    (hub, addr)
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn peer_settings(hub: &str, dir: &TempDir, port: u16) -> Settings {
    let mut settings = Settings::default();
    settings.network.hub_address = hub.to_string();
    settings.share.port_range_from = port;
    settings.share.port_range_to = port + 1;
    settings.share.timeout_seconds = 5;
    settings.share.receive_dir = Some(dir.path().to_path_buf());
    settings
}

async fn wait_for_members(hub: &GroupHub, count: usize) {
    for _ in 0..200 {
        if hub.member_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("hub never reached {} members", count);
}

#[tokio::test]
async fn test_file_reaches_peer_through_hub() {
    let (hub, hub_addr) = start_hub().await;
    let port = free_port().await;
    let send_dir = tempdir().unwrap();
    let recv_dir = tempdir().unwrap();

    let receiver = PeerShareDaemon::new(peer_settings(&hub_addr, &recv_dir, port))
        .await
        .unwrap();
    let seen: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    receiver
        .coordinator()
        .register_receive_action("onVideo", move |path: &Path| {
            sink.lock().unwrap().push(path.to_path_buf());
        })
        .await;
    let receiver_shutdown = receiver.shutdown_handle();
    let receiver_task = tokio::spawn(receiver.run());

    let sender = PeerShareDaemon::new(peer_settings(&hub_addr, &send_dir, port))
        .await
        .unwrap();
    let sender_coordinator = sender.coordinator();
    let sender_shutdown = sender.shutdown_handle();
    let mut reports = sender_coordinator.subscribe_reports();
    let sender_task = tokio::spawn(sender.run());

    wait_for_members(&hub, 2).await;

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 251) as u8).collect();
    let video = send_dir.path().join("video.mp4");
    std::fs::write(&video, &payload).unwrap();

    let used = sender_coordinator.send(&video, "onVideo").await.unwrap();
    assert_eq!(used, port);

    let report = tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.delivered, vec!["127.0.0.1".to_string()]);
    assert!(report.failed.is_empty());
    assert!(!sender_coordinator.ports().is_in_use(port));

    for _ in 0..200 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // a late duplicate dispatch would show up here
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received = seen.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].parent().unwrap(), recv_dir.path());
    assert_eq!(received[0].extension().unwrap(), "mp4");
    assert_eq!(std::fs::read(&received[0]).unwrap(), payload);

    sender_shutdown.send(()).unwrap();
    receiver_shutdown.send(()).unwrap();
    sender_task.await.unwrap().unwrap();
    receiver_task.await.unwrap().unwrap();

    assert!(!received[0].exists());
    assert!(video.exists());
}

#[tokio::test]
async fn test_lone_sender_releases_port_immediately() {
    let (hub, hub_addr) = start_hub().await;
    let port = free_port().await;
    let dir = tempdir().unwrap();

    let sender = PeerShareDaemon::new(peer_settings(&hub_addr, &dir, port))
        .await
        .unwrap();
    let coordinator = sender.coordinator();
    let shutdown = sender.shutdown_handle();
    let mut reports = coordinator.subscribe_reports();
    let task = tokio::spawn(sender.run());
    wait_for_members(&hub, 1).await;

    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"nobody is listening").unwrap();
    coordinator.send(&notes, "onText").await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(report.delivered.is_empty());
    assert!(report.failed.is_empty());
    assert!(coordinator.ports().in_use().is_empty());

    shutdown.send(()).unwrap();
    task.await.unwrap().unwrap();
}
