use std::sync::Arc;
use tempfile::TempDir;

use searchive::tags::keyword::ExtractionMethod;
use searchive::tags::resolver::Resolution;
use searchive::{Config, DataPaths, DocumentService, NewDocument};

fn open_with(dir: &TempDir, config: Config) -> DocumentService {
    let paths = DataPaths::from_root_with_config(dir.path().to_path_buf(), config);
    DocumentService::open(&paths).unwrap()
}

fn open(dir: &TempDir) -> DocumentService {
    open_with(dir, Config::default())
}

fn text(name: &str, content: &str) -> NewDocument {
    NewDocument {
        filename: name.to_string(),
        file_type: "text/plain".to_string(),
        content: content.to_string(),
    }
}

const DOCS: [&str; 5] = [
    "Kubernetes schedules containers across a cluster of worker nodes.",
    "Rust ownership and borrowing prevent data races at compile time.",
    "Tantivy builds inverted indexes for fast full-text search in Rust.",
    "SQLite write-ahead logging lets readers proceed while a writer commits.",
    "Embeddings map words to vectors so similar meanings land close together.",
];

#[tokio::test]
async fn test_strategy_switches_at_threshold() {
    let dir = TempDir::new().unwrap();
    let service = open(&dir);

    let mut methods = Vec::new();
    for (i, content) in DOCS.iter().enumerate() {
        let outcome = service
            .upload(text(&format!("doc{}.txt", i), content))
            .await
            .unwrap();
        methods.push(outcome.method);
    }

    // The document being ingested is already counted, so the fifth crosses the threshold of 5
    assert!(methods[..4].iter().all(|m| *m == ExtractionMethod::ColdStart));
    assert_eq!(methods[4], ExtractionMethod::CorpusRelative);
}

#[tokio::test]
async fn test_same_content_reuses_tags() {
    let dir = TempDir::new().unwrap();
    let service = open(&dir);

    let first = service.upload(text("a.txt", DOCS[0])).await.unwrap();
    let tags_after_first = service.database().stats().unwrap().tags;

    let second = service.upload(text("b.txt", DOCS[0])).await.unwrap();
    assert!(second
        .tags
        .iter()
        .all(|r| r.resolution != Resolution::Created));
    assert_eq!(service.database().stats().unwrap().tags, tags_after_first);

    let first_ids: Vec<_> = first.tags.iter().map(|r| r.tag.id).collect();
    let second_ids: Vec<_> = second.tags.iter().map(|r| r.tag.id).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn test_reopen_keeps_state() {
    let dir = TempDir::new().unwrap();
    let id = {
        let service = open(&dir);
        service.upload(text("wal.txt", DOCS[3])).await.unwrap().document.id
    };

    let service = open(&dir);
    assert_eq!(service.find_document(id).await.unwrap().filename, "wal.txt");
    assert!(!service.tags_for_document(id).await.unwrap().is_empty());
    assert_eq!(service.search_by_content("writer", 5).await.unwrap().len(), 1);
    assert!(service.sync().audit().await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_uploads_share_new_tag() {
    let dir = TempDir::new().unwrap();
    // The second upload may start before the first one's tags are mirrored
    let mut config = Config::default();
    config.tags.strict_dedup = true;
    let service = Arc::new(open_with(&dir, config));
    let content = "퀀텀컴퓨팅 퀀텀컴퓨팅 퀀텀컴퓨팅";

    let uploads: Vec<_> = (0..2)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .upload(text(&format!("quantum{}.txt", i), content))
                    .await
            })
        })
        .collect();

    let mut documents = Vec::new();
    for upload in uploads {
        let outcome = upload.await.unwrap().unwrap();
        documents.push(outcome.document.id);
    }

    let db = service.database();
    let tag = db.find_tag_by_name("퀀텀컴퓨팅").unwrap().unwrap();
    assert_eq!(db.stats().unwrap().tags, 1);

    for id in documents {
        let tags = db.tags_for_document(id).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, tag.id);
    }

    let found = service
        .search_by_tags(&["퀀텀컴퓨팅".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}
