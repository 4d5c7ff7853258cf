//! Refresh cycles: additions, updates, removals, the byte ceiling, and
//! replacement-ordered admission with its persisted index.

mod common;

use common::{sends, DispatchEvent, Fixture};
use fsorigin::config::{Notify, ReadTarget, ReplaceMode};
use fsorigin::replace::index::{self, Snapshot};

#[tokio::test]
async fn new_files_appear_after_a_refresh() {
    let fixture = Fixture::start(&[("a.txt", b"abc")], |_| {}).await;

    assert_eq!(fixture.get("b.txt/get").await.status(), Some(404));

    fixture.write_file("b.txt", b"defg");
    fixture.refresh_and_wait().await;

    let response = fixture.get("b.txt/get").await;
    assert_eq!(response.status(), Some(200));
    assert_eq!(response.body, b"defg");
}

#[tokio::test]
async fn changed_files_serve_new_contents_with_a_new_etag() {
    let fixture = Fixture::start(&[("a.txt", b"abc")], |_| {}).await;
    let before = fixture.get("a.txt/get").await;

    fixture.write_file("a.txt", b"changed");
    fixture.refresh_and_wait().await;

    let after = fixture.get("a.txt/get").await;
    assert_eq!(after.body, b"changed");
    assert_ne!(
        after.info.get("etag").expect("etag"),
        before.info.get("etag").expect("etag")
    );
}

#[tokio::test]
async fn same_mtime_content_drift_still_changes_the_etag() {
    let fixture = Fixture::start(&[("a.txt", b"abc")], |_| {}).await;
    let before = fixture.get("a.txt/get").await;

    // An edit the mtime clock cannot distinguish: rewrite the file, then
    // pin its mtime back to the original value.
    let mtime = std::fs::metadata(fixture.path("a.txt"))
        .expect("stat")
        .modified()
        .expect("mtime");
    fixture.write_file("a.txt", b"xyz");
    let file = std::fs::File::options()
        .write(true)
        .open(fixture.path("a.txt"))
        .expect("open");
    file.set_modified(mtime).expect("pin mtime");
    drop(file);

    fixture.refresh_and_wait().await;

    let after = fixture.get("a.txt/get").await;
    assert_eq!(after.body, b"xyz");
    assert_ne!(
        after.info.get("etag").expect("etag"),
        before.info.get("etag").expect("etag")
    );
    // The mtime itself is unchanged; the counter disambiguates.
    assert_eq!(
        after.info.get("last-modified").expect("last-modified"),
        before.info.get("last-modified").expect("last-modified")
    );
}

#[tokio::test]
async fn removed_files_vanish_and_unsubscribe() {
    let mut fixture = Fixture::start(&[("a.txt", b"abc")], |_| {}).await;
    fixture.drain_events();

    fixture.remove_file("a.txt");
    fixture.refresh_and_wait().await;

    assert_eq!(fixture.get("a.txt/get").await.status(), Some(404));
    let events = fixture.drain_events();
    assert!(events.contains(&DispatchEvent::Unsubscribe("a.txt/get".to_owned())));
    assert!(events.contains(&DispatchEvent::Unsubscribe("a.txt/head".to_owned())));
}

#[tokio::test]
async fn write_declared_records_survive_removal_as_empty_files() {
    let fixture = Fixture::start(&[("keep.txt", b"data")], |c| {
        c.write_truncate = vec!["keep.txt".to_owned()];
    })
    .await;

    fixture.remove_file("keep.txt");
    fixture.refresh_and_wait().await;

    let response = fixture.get("keep.txt/get").await;
    assert_eq!(response.status(), Some(200));
    assert!(response.body.is_empty());

    // And they are still writable.
    let response = fixture.request("keep.txt/put", &[], b"back").await;
    assert_eq!(response.status(), Some(200));
    assert_eq!(fixture.read_file("keep.txt"), b"back");
}

#[tokio::test]
async fn files_beyond_the_ceiling_are_never_admitted() {
    let oversized = vec![b'x'; 2048];
    let fixture = Fixture::start(&[("big.bin", &oversized)], |c| {
        c.files_size = Some(1); // 1 KiB
    })
    .await;

    assert_eq!(fixture.get("big.bin/get").await.status(), Some(404));
}

#[tokio::test]
async fn refresh_updates_fire_notifications() {
    let mut fixture = Fixture::start(&[("a.txt", b"abc")], |c| {
        c.notify_on_start = false;
        c.notify_one = vec![Notify {
            pattern: "a.txt".to_owned(),
            name: "/sink/a".to_owned(),
            timeout_ms: 1000,
            priority: 0,
        }];
    })
    .await;
    fixture.drain_events();

    fixture.write_file("a.txt", b"v2");
    fixture.refresh_and_wait().await;

    let events = fixture.drain_events();
    let notifications = sends(&events);
    assert_eq!(notifications.len(), 1);
    assert!(matches!(
        notifications[0],
        DispatchEvent::Send { body, .. } if body == b"v2"
    ));
}

#[tokio::test]
async fn allowlist_segments_expose_byte_windows() {
    let fixture = Fixture::start(&[("log.txt", b"0123456789")], |c| {
        c.read = vec![ReadTarget::Segmented {
            name: "log.txt".to_owned(),
            offset: Some(-4),
            length: None,
        }];
    })
    .await;

    let response = fixture.get("log.txt/get").await;
    assert_eq!(response.status(), Some(200));
    assert_eq!(response.body, b"6789");
}

#[tokio::test]
async fn lfuda_keeps_hot_files_when_the_ceiling_tightens() {
    let a = vec![b'a'; 400];
    let b = vec![b'b'; 500];
    let fixture = Fixture::start(&[("a.bin", &a), ("b.bin", &b)], |c| {
        c.files_size = Some(1); // 1 KiB ceiling
        c.refresh = Some(3600);
        c.replace = ReplaceMode::Lfuda;
    })
    .await;

    // Both fit initially (900 bytes).
    assert_eq!(fixture.get("a.bin/get").await.status(), Some(200));
    assert_eq!(fixture.get("b.bin/get").await.status(), Some(200));

    // Heat up a.bin, then grow b.bin past what the ceiling can hold.
    for _ in 0..3 {
        fixture.get("a.bin/get").await;
    }
    fixture.write_file("b.bin", &vec![b'b'; 800]);
    fixture.refresh_and_wait().await;

    assert_eq!(fixture.get("a.bin/get").await.status(), Some(200));
    assert_eq!(fixture.get("b.bin/get").await.status(), Some(404));
}

#[tokio::test]
async fn replacement_index_is_persisted_at_refresh() {
    let fixture = Fixture::start(&[("a.bin", b"aaaa"), ("b.bin", b"bbbb")], |c| {
        c.files_size = Some(64);
        c.refresh = Some(3600);
        c.replace = ReplaceMode::Lfuda;
    })
    .await;

    fixture.get("a.bin/get").await;
    fixture.get("a.bin/get").await;
    fixture.get("b.bin/get").await;
    fixture.refresh_and_wait().await;

    let snapshot = index::load(fixture.tempdir.path(), 0)
        .await
        .expect("sidecar written");
    let Snapshot::Lfuda { entries, .. } = snapshot else {
        panic!("lfuda snapshot expected");
    };
    let hits = |name: &str| {
        entries
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, hits)| *hits)
            .expect("entry present")
    };
    assert_eq!(hits("a.bin"), 2);
    assert_eq!(hits("b.bin"), 1);
}

#[tokio::test]
async fn lru_persists_hit_ordering() {
    let fixture = Fixture::start(&[("a.bin", b"aaaa"), ("b.bin", b"bbbb")], |c| {
        c.files_size = Some(64);
        c.refresh = Some(3600);
        c.replace = ReplaceMode::Lru;
    })
    .await;

    fixture.get("b.bin/get").await;
    fixture.get("a.bin/get").await;
    fixture.refresh_and_wait().await;

    let snapshot = index::load(fixture.tempdir.path(), 0)
        .await
        .expect("sidecar written");
    let Snapshot::Lru { entries } = snapshot else {
        panic!("lru snapshot expected");
    };
    let stamp = |name: &str| {
        entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .expect("entry present")
    };
    assert!(stamp("a.bin") > stamp("b.bin"));
}

#[cfg(unix)]
#[tokio::test]
async fn write_capabilities_follow_the_access_mode() {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    let mut fixture = Fixture::start(&[("a.txt", b"abc")], |c| {
        c.write_truncate = vec!["a.txt".to_owned()];
    })
    .await;
    fixture.drain_events();

    assert_eq!(fixture.request("a.txt/put", &[], b"v2").await.status(), Some(200));

    // The file turning read-only revokes the capability at the next
    // refresh and unsubscribes its write suffix.
    std::fs::set_permissions(fixture.path("a.txt"), Permissions::from_mode(0o444))
        .expect("chmod read-only");
    fixture.refresh_and_wait().await;

    assert_eq!(fixture.request("a.txt/put", &[], b"v3").await.status(), Some(404));
    let events = fixture.drain_events();
    assert!(events.contains(&DispatchEvent::Unsubscribe("a.txt/put".to_owned())));
    assert_eq!(fixture.read_file("a.txt"), b"v2");

    // Restoring write access re-grants and resubscribes.
    std::fs::set_permissions(fixture.path("a.txt"), Permissions::from_mode(0o644))
        .expect("chmod writable");
    fixture.refresh_and_wait().await;

    let events = fixture.drain_events();
    assert!(events.contains(&DispatchEvent::Subscribe("a.txt/put".to_owned())));
    assert_eq!(fixture.request("a.txt/put", &[], b"v3").await.status(), Some(200));
    assert_eq!(fixture.read_file("a.txt"), b"v3");
}

#[tokio::test]
async fn sidecar_files_are_not_served() {
    let fixture = Fixture::start(&[("a.txt", b"abc")], |c| {
        c.files_size = Some(64);
        c.refresh = Some(3600);
        c.replace = ReplaceMode::Lru;
    })
    .await;

    fixture.get("a.txt/get").await;
    fixture.refresh_and_wait().await;
    assert!(index::sidecar_path(fixture.tempdir.path(), 0).exists());

    fixture.refresh_and_wait().await;
    assert_eq!(
        fixture.get(".fsorigin-index.0/get").await.status(),
        Some(404)
    );
}
