// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(not(feature = "limited-supportability"))]

use alexandria_writer::{SubmitError, WriterConfig, WriterWrapper};
use mockito::Server;
use std::io::Write;
use tokio::time::{sleep, timeout, Duration};
use tracing_test::traced_test;

const UPLOAD_PATH: &str = "/upload/techaro.anubis/instance-1";

fn config_for(base_url: String, flush_interval: Duration) -> WriterConfig {
    WriterConfig {
        base_url,
        flush_interval,
        ring_buffer_size: 16,
        ..WriterConfig::new("techaro.anubis", "instance-1")
    }
}

#[tokio::test]
async fn flush_ships_buffered_chunks_in_one_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", UPLOAD_PATH)
        .match_body("line 1\nline 2\n")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (mut writer, flusher) =
        WriterWrapper::new(config_for(server.url(), Duration::from_secs(5)), Vec::new());
    writer.write_all(b"line 1\n").expect("write failed");
    writer.write_all(b"line 2\n").expect("write failed");

    assert_eq!(flusher.flush().await.expect("flush failed"), 2);
    mock.assert_async().await;

    // The application sink saw every byte as well.
    assert_eq!(writer.get_ref(), b"line 1\nline 2\n");
}

#[tokio::test]
async fn flush_with_empty_buffer_makes_no_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let (_writer, flusher) =
        WriterWrapper::new(config_for(server.url(), Duration::from_secs(5)), Vec::new());

    assert_eq!(flusher.flush().await.expect("flush failed"), 0);
    mock.assert_async().await;
}

#[tokio::test]
#[traced_test]
async fn non_ok_response_is_logged_and_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", UPLOAD_PATH)
        .with_status(500)
        .with_body("Internal Server Error")
        .expect(1)
        .create_async()
        .await;

    let (mut writer, flusher) =
        WriterWrapper::new(config_for(server.url(), Duration::from_secs(5)), Vec::new());
    writer.write_all(b"dropped\n").expect("write failed");

    let result = flusher.flush().await;
    assert!(matches!(result, Err(SubmitError::Status { got }) if got.as_u16() == 500));
    assert!(logs_contain("wrong alexandria response code"));

    // The failed chunks are gone, nothing is requeued.
    assert_eq!(flusher.flush().await.expect("flush failed"), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn accepted_status_other_than_ok_is_a_failure() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("PUT", UPLOAD_PATH)
        .with_status(202)
        .create_async()
        .await;

    let (mut writer, flusher) =
        WriterWrapper::new(config_for(server.url(), Duration::from_secs(5)), Vec::new());
    writer.write_all(b"x").expect("write failed");

    assert!(matches!(
        flusher.flush().await,
        Err(SubmitError::Status { .. })
    ));
}

#[tokio::test]
async fn unreachable_archive_is_a_transport_error() {
    let (mut writer, flusher) = WriterWrapper::new(
        config_for("http://127.0.0.1:1".to_string(), Duration::from_secs(1)),
        Vec::new(),
    );
    writer.write_all(b"nobody listening").expect("write failed");

    assert!(matches!(
        flusher.flush().await,
        Err(SubmitError::Transport(_))
    ));
    // The application write path is unaffected.
    assert_eq!(writer.get_ref(), b"nobody listening");
}

#[tokio::test]
async fn base_url_set_after_construction_is_used() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", UPLOAD_PATH)
        .match_body("deferred")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (mut writer, flusher) = WriterWrapper::new(
        config_for("http://127.0.0.1:1".to_string(), Duration::from_secs(5)),
        Vec::new(),
    );
    writer.handle().set_base_url(server.url());
    writer.write_all(b"deferred").expect("write failed");

    assert_eq!(flusher.flush().await.expect("flush failed"), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn run_ships_on_every_interval() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("PUT", UPLOAD_PATH)
        .match_body("first")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("PUT", UPLOAD_PATH)
        .match_body("second")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (mut writer, flusher) = WriterWrapper::new(
        config_for(server.url(), Duration::from_millis(50)),
        Vec::new(),
    );
    let handle = writer.handle();
    let task = tokio::spawn(flusher.run());

    writer.write_all(b"first").expect("write failed");
    let wait_first = async {
        while !first.matched_async().await {
            sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(Duration::from_secs(2), wait_first)
        .await
        .expect("timed out before first flush");

    writer.write_all(b"second").expect("write failed");
    let wait_second = async {
        while !second.matched_async().await {
            sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(Duration::from_secs(2), wait_second)
        .await
        .expect("timed out before second flush");

    handle.close();
    timeout(Duration::from_secs(2), task)
        .await
        .expect("flusher did not stop")
        .expect("flusher panicked");

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn close_performs_exactly_one_final_flush() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", UPLOAD_PATH)
        .match_body("a\nb\n")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    // An interval long enough that only the shutdown flush can ship.
    let (mut writer, flusher) = WriterWrapper::new(
        config_for(server.url(), Duration::from_secs(3600)),
        Vec::new(),
    );
    let handle = writer.handle();
    let task = tokio::spawn(flusher.run());

    writer.write_all(b"a\n").expect("write failed");
    writer.write_all(b"b\n").expect("write failed");
    handle.close();
    writer.write_all(b"not buffered\n").expect("write failed");

    timeout(Duration::from_secs(5), task)
        .await
        .expect("flusher did not stop")
        .expect("flusher panicked");

    mock.assert_async().await;
    assert_eq!(writer.get_ref(), b"a\nb\nnot buffered\n");
}

#[tokio::test]
async fn disabled_writer_never_contacts_archive() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let config = WriterConfig {
        enabled: false,
        ..config_for(server.url(), Duration::from_millis(10))
    };
    let (mut writer, flusher) = WriterWrapper::new(config, Vec::new());
    writer.write_all(b"local only").expect("write failed");

    flusher.run().await;
    mock.assert_async().await;
    assert_eq!(writer.get_ref(), b"local only");
}
