//! Store handles created from one database observe each other's writes, and
//! concurrent writers never produce torn reads.

use kairos_rs_protocol::Role;
use kairos_rs_store::{Database, HistoryLimits, JobRequest};
use pretty_assertions::assert_eq;
use std::thread;
use tempfile::tempdir;

#[test]
fn handles_share_state_across_reopen() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("kairos.db");
    {
        let db = Database::open(&path).expect("open");
        db.memory()
            .save("user_name", "Alice", &["profile".to_string()])
            .expect("save");
        db.history(HistoryLimits::default())
            .append("1", Role::User, "hello")
            .expect("append");
        db.jobs()
            .create(JobRequest {
                name: "morning".to_string(),
                target_conversation_id: "1".to_string(),
                prompt: "say good morning".to_string(),
                cron: Some("08:00".to_string()),
                once_at: None,
            })
            .expect("create");
    }

    let db = Database::open(&path).expect("reopen");
    assert_eq!(
        db.memory().get("user_name").expect("get").expect("record").value,
        "Alice"
    );
    assert_eq!(
        db.history(HistoryLimits::default())
            .recent("1", 5)
            .expect("recent")
            .len(),
        1
    );
    assert_eq!(db.jobs().list().expect("list")[0].name, "morning");
}

#[test]
fn concurrent_upserts_and_reads_stay_consistent() {
    let db = Database::open_in_memory().expect("db");
    let writers: Vec<_> = (0..4)
        .map(|worker| {
            let memory = db.memory();
            thread::spawn(move || {
                for round in 0..50 {
                    let value = format!("{worker}-{round}");
                    memory
                        .save("shared", &value, &[value.clone()])
                        .expect("save");
                }
            })
        })
        .collect();
    let reader = {
        let memory = db.memory();
        thread::spawn(move || {
            for _ in 0..200 {
                if let Some(record) = memory.get("shared").expect("get") {
                    assert_eq!(record.tags, vec![record.value.clone()]);
                    assert!(record.updated_at >= record.created_at);
                }
            }
        })
    };
    for writer in writers {
        writer.join().expect("writer");
    }
    reader.join().expect("reader");
    assert_eq!(db.memory().count().expect("count"), 1);
}
