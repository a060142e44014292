//! End-to-end exercises of the write path over the in-memory event store:
//! dispatch → aggregate → append → replay.

use std::sync::Arc;

use podsync_types::{SourceFeedId, SourceItemId};
use sync_engine::bounded_contexts::library::application::commands::{
    CommandEnvelope, LibraryCommand,
};
use sync_engine::bounded_contexts::library::application::dispatcher::Dispatcher;
use sync_engine::bounded_contexts::library::application::runtime::{
    AggregateRuntime, RuntimeConfig,
};
use sync_engine::bounded_contexts::library::domain::value_objects::{CollectionId, UserId};
use sync_engine::bounded_contexts::library::infrastructure::event_store::{
    EventStore, InMemoryEventStore,
};

fn setup() -> (Arc<Dispatcher>, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let runtime = Arc::new(AggregateRuntime::new(
        store.clone() as Arc<dyn EventStore>,
        RuntimeConfig::default(),
    ));
    (Arc::new(Dispatcher::new(runtime)), store)
}

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn feed(n: &str) -> SourceFeedId {
    SourceFeedId::from_url(&format!("https://example.org/{}.xml", n))
}

fn item(n: &str) -> SourceItemId {
    SourceItemId::from_parts(n, &format!("https://example.org/{}.mp3", n))
}

async fn dispatch(
    dispatcher: &Dispatcher,
    user_id: &UserId,
    command: LibraryCommand,
) -> Result<
    sync_engine::bounded_contexts::library::application::runtime::ExecutionOutcome,
    sync_engine::bounded_contexts::library::application::dispatcher::DispatchError,
> {
    dispatcher
        .dispatch(CommandEnvelope::new(user_id.clone(), command))
        .await
}

#[tokio::test]
async fn unsubscribe_blocks_collection_adds_until_resubscribed() {
    let (dispatcher, store) = setup();
    let u = user("u1");

    dispatch(&dispatcher, &u, LibraryCommand::Subscribe { feed: feed("f1") })
        .await
        .unwrap();

    // Find the default collection id from the emitted event.
    let created = store
        .read_stream("u1", 0, 10)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.event_type == "CollectionCreated")
        .unwrap();
    let collection_id = CollectionId::from_string(
        created.payload["collection_id"].as_str().unwrap(),
    )
    .unwrap();

    dispatch(&dispatcher, &u, LibraryCommand::Unsubscribe { feed: feed("f1") })
        .await
        .unwrap();

    // While unsubscribed, the feed cannot be added to a collection.
    let err = dispatch(
        &dispatcher,
        &u,
        LibraryCommand::AddFeedToCollection {
            collection_id,
            feed: feed("f1"),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "feed_not_subscribed");

    // After re-subscribing it works again (and the feed is already in the
    // default collection, so the add records nothing new).
    dispatch(&dispatcher, &u, LibraryCommand::Subscribe { feed: feed("f1") })
        .await
        .unwrap();
    dispatch(
        &dispatcher,
        &u,
        LibraryCommand::AddFeedToCollection {
            collection_id,
            feed: feed("f1"),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn save_share_and_privacy_flow() {
    let (dispatcher, _store) = setup();
    let u = user("u1");

    dispatch(&dispatcher, &u, LibraryCommand::Subscribe { feed: feed("f1") })
        .await
        .unwrap();
    let outcome = dispatch(
        &dispatcher,
        &u,
        LibraryCommand::SaveEpisode {
            playlist_id: None,
            feed: feed("f1"),
            item: item("e1"),
            item_title: Some("Episode One".into()),
            feed_title: Some("Feed One".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.event_types, vec!["EpisodeSaved"]);

    dispatch(
        &dispatcher,
        &u,
        LibraryCommand::ShareEpisode {
            feed: feed("f1"),
            item: item("e1"),
        },
    )
    .await
    .unwrap();

    let outcome = dispatch(
        &dispatcher,
        &u,
        LibraryCommand::ChangePrivacy {
            privacy: podsync_types::PrivacySetting::Private,
            feed: None,
            item: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.event_types, vec!["PrivacyChanged"]);
}

#[tokio::test]
async fn interleaved_users_keep_their_own_dense_versions() {
    let (dispatcher, store) = setup();

    for n in 0..3 {
        for id in ["a", "b"] {
            dispatch(
                &dispatcher,
                &user(id),
                LibraryCommand::RecordPlay {
                    feed: feed("f"),
                    item: item(&format!("e{}", n)),
                    position: n,
                    played: false,
                    timestamp: None,
                },
            )
            .await
            .unwrap();
        }
    }

    for id in ["a", "b"] {
        let stream = store.read_stream(id, 0, 100).await.unwrap();
        let versions: Vec<_> = stream.iter().map(|e| e.stream_version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    // Global positions are dense across the whole store.
    let all = store.read_all(0, 100).await.unwrap();
    let positions: Vec<_> = all.iter().map(|e| e.global_position).collect();
    assert_eq!(positions, (1..=6).collect::<Vec<i64>>());
}

#[tokio::test]
async fn many_concurrent_writers_never_lose_events() {
    let (dispatcher, store) = setup();

    let mut handles = Vec::new();
    for n in 0..20 {
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move {
            dispatcher
                .dispatch(CommandEnvelope::new(
                    user("hot"),
                    LibraryCommand::ShareEpisode {
                        feed: feed("f1"),
                        item: item(&format!("e{}", n)),
                    },
                ))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.stream_version("hot").await.unwrap(), 20);
}
