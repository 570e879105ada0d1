use crate::common::{installed_marker, toolchain_zip};
use futures::StreamExt;
use prusti_assistant::errors::InstallError;
use prusti_assistant::platform::Platform;
use prusti_assistant::toolchain::{
    archive_url, progress_channel, AcquisitionStrategy, InstallProgress, InstallStep, Installer,
    ProgressReporter,
};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_archive(server: &MockServer, body: Vec<u8>, expected_requests: u64) {
    Mock::given(method("GET"))
        .and(path("/PrustiToolsLinux.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected_requests)
        .mount(server)
        .await;
}

fn remote(server: &MockServer) -> AcquisitionStrategy {
    AcquisitionStrategy::RemoteArchive {
        url: archive_url(&server.uri(), Platform::Linux),
    }
}

#[tokio::test]
async fn test_first_install_downloads_and_second_reuses() {
    let server = MockServer::start().await;
    serve_archive(&server, toolchain_zip("v1"), 1).await;

    let storage = TempDir::new().unwrap();
    let installer = Installer::new(storage.path().join("prustiTools"));
    let strategy = remote(&server);

    let first = installer
        .install(&strategy, false, &ProgressReporter::silent())
        .await
        .unwrap();
    assert!(first.did_work);
    assert!(first.location.is_complete());
    assert_eq!(installed_marker(first.location.base()), "v1");

    let reporter = ProgressReporter::silent();
    let second = installer.install(&strategy, false, &reporter).await.unwrap();
    assert!(!second.did_work);
    assert_eq!(second.location, first.location);
    assert!(!reporter.did_report());
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes() {
    let server = MockServer::start().await;
    serve_archive(&server, toolchain_zip("v1"), 1).await;

    let storage = TempDir::new().unwrap();
    let installer = Installer::new(storage.path().join("prustiTools"));

    let (reporter, stream) = progress_channel();
    installer.install(&remote(&server), false, &reporter).await.unwrap();
    drop(reporter);

    let items: Vec<InstallProgress> = stream.collect().await;
    assert!(!items.is_empty());
    assert_eq!(items[0].step, InstallStep::Downloading);
    assert!(items.windows(2).all(|w| w[0].fraction <= w[1].fraction));
    assert!(items.iter().all(|p| (0.0..=1.0).contains(&p.fraction)));

    let last = items.last().unwrap();
    assert_eq!(last.fraction, 1.0);
    assert_eq!(last.step, InstallStep::Extracting);
}

#[tokio::test]
async fn test_forced_update_replaces_install() {
    let server = MockServer::start().await;
    let storage = TempDir::new().unwrap();
    let installer = Installer::new(storage.path().join("prustiTools"));

    serve_archive(&server, toolchain_zip("v1"), 1).await;
    installer
        .install(&remote(&server), false, &ProgressReporter::silent())
        .await
        .unwrap();

    server.reset().await;
    serve_archive(&server, toolchain_zip("v2"), 1).await;
    let outcome = installer
        .install(&remote(&server), true, &ProgressReporter::silent())
        .await
        .unwrap();

    assert!(outcome.did_work);
    assert_eq!(installed_marker(outcome.location.base()), "v2");

    // Only the published toolchain remains in the storage directory.
    let entries: Vec<_> = std::fs::read_dir(storage.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("prustiTools")]);
}

#[tokio::test]
async fn test_failed_download_keeps_previous_install() {
    let server = MockServer::start().await;
    let storage = TempDir::new().unwrap();
    let installer = Installer::new(storage.path().join("prustiTools"));

    serve_archive(&server, toolchain_zip("v1"), 1).await;
    installer
        .install(&remote(&server), false, &ProgressReporter::silent())
        .await
        .unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (reporter, stream) = progress_channel();
    let err = installer
        .install(&remote(&server), true, &reporter)
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::Download { .. }));

    // Reports after the failure are dropped.
    reporter.report(0.9, InstallStep::Extracting);
    drop(reporter);
    let items: Vec<InstallProgress> = stream.collect().await;
    assert!(items.iter().all(|p| p.step == InstallStep::Downloading));

    assert_eq!(installed_marker(&storage.path().join("prustiTools")), "v1");
}

#[tokio::test]
async fn test_corrupt_archive_keeps_previous_install() {
    let server = MockServer::start().await;
    let storage = TempDir::new().unwrap();
    let target = storage.path().join("prustiTools");
    let installer = Installer::new(&target);

    serve_archive(&server, toolchain_zip("v1"), 1).await;
    installer
        .install(&remote(&server), false, &ProgressReporter::silent())
        .await
        .unwrap();

    server.reset().await;
    serve_archive(&server, b"this is not a zip archive".to_vec(), 1).await;

    let err = installer
        .install(&remote(&server), true, &ProgressReporter::silent())
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::Archive(_)));
    assert_eq!(installed_marker(&target), "v1");
}

#[tokio::test]
async fn test_incomplete_archive_is_rejected() {
    let server = MockServer::start().await;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("prusti-driver", zip::write::SimpleFileOptions::default())
        .unwrap();
    let body = writer.finish().unwrap().into_inner();
    serve_archive(&server, body, 1).await;

    let storage = TempDir::new().unwrap();
    let target = storage.path().join("prustiTools");
    let installer = Installer::new(&target);

    let err = installer
        .install(&remote(&server), false, &ProgressReporter::silent())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing an executable"));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_local_strategy_uses_directory_in_place() {
    let server = MockServer::start().await;
    serve_archive(&server, toolchain_zip("local"), 1).await;

    // Produce a complete toolchain directory to point the local channel at.
    let build = TempDir::new().unwrap();
    let local_dir = build.path().join("prusti-dev");
    Installer::new(&local_dir)
        .install(&remote(&server), false, &ProgressReporter::silent())
        .await
        .unwrap();

    let storage = TempDir::new().unwrap();
    let installer = Installer::new(storage.path().join("prustiTools"));
    let strategy = AcquisitionStrategy::LocalDirectory {
        path: local_dir.clone(),
    };

    let reporter = ProgressReporter::silent();
    let outcome = installer.install(&strategy, true, &reporter).await.unwrap();
    assert!(!outcome.did_work);
    assert_eq!(outcome.location.base(), local_dir.as_path());
    assert!(!reporter.did_report());
    assert!(!storage.path().join("prustiTools").exists());
}

#[tokio::test]
async fn test_concurrent_installs_are_serialized() {
    let server = MockServer::start().await;
    serve_archive(&server, toolchain_zip("v1"), 1).await;

    let storage = TempDir::new().unwrap();
    let installer = Arc::new(Installer::new(storage.path().join("prustiTools")));
    let strategy = remote(&server);

    let a = {
        let installer = Arc::clone(&installer);
        let strategy = strategy.clone();
        tokio::spawn(async move {
            installer
                .install(&strategy, false, &ProgressReporter::silent())
                .await
        })
    };
    let b = {
        let installer = Arc::clone(&installer);
        let strategy = strategy.clone();
        tokio::spawn(async move {
            installer
                .install(&strategy, false, &ProgressReporter::silent())
                .await
        })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    // One call downloads, the other finds the finished install.
    assert_ne!(a.did_work, b.did_work);
    assert_eq!(a.location, b.location);
    assert_eq!(installed_marker(a.location.base()), "v1");
}
