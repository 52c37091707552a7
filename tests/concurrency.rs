//! Compiles and invocations racing on the same path must always observe a
//! complete endpoint: the statement text and its parameters come from the
//! same compilation.

mod common;

use std::sync::Arc;

use common::{StubConnector, TestApp};
use hyper::StatusCode;
use serde_json::json;

const INT_TEMPLATE: &str = "SELECT #{a, int} AS a";
const MIXED_TEMPLATE: &str = "SELECT #{b} AS b, #{c, float} AS c";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_compile_and_execute_never_tears() {
    let app = Arc::new(TestApp::new(StubConnector::echo()));
    app.add_datasource("main", "stub://main").await;
    let (status, _) = app.compile("/hot", INT_TEMPLATE).await;
    assert_eq!(status, StatusCode::OK);

    let mut tasks = Vec::new();

    for w in 0..4 {
        let app = Arc::clone(&app);
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                let sql = if (i + w) % 2 == 0 {
                    INT_TEMPLATE
                } else {
                    MIXED_TEMPLATE
                };
                let (status, _) = app.compile("/hot", sql).await;
                assert_eq!(status, StatusCode::OK);
            }
        }));
    }

    for _ in 0..8 {
        let app = Arc::clone(&app);
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let (status, body) = app
                    .send("POST", "/dynamic/hot", Some(json!({"a": 1, "b": "x", "c": 2.5})))
                    .await;
                assert_eq!(status, StatusCode::OK, "unexpected response {body}");

                let row = &body["data"][0];
                match row["sql"].as_str() {
                    Some("SELECT $1::int8 AS a") => assert_eq!(row["params"], json!([1])),
                    Some("SELECT $1 AS b, $2::float8 AS c") => {
                        assert_eq!(row["params"], json!(["x", 2.5]))
                    }
                    other => panic!("torn or unknown statement: {other:?}"),
                }
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let (_, listed) = app.send("GET", "/meta/query", None).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn datasource_swaps_during_traffic_never_fail_queries() {
    let app = Arc::new(TestApp::new(StubConnector::echo()));
    app.add_datasource("main", "stub://main-0").await;
    app.compile("/ping", "SELECT 1 AS one").await;

    let swapper = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            for i in 1..=20 {
                app.add_datasource("main", &format!("stub://main-{i}")).await;
            }
        })
    };

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let (status, body) = app.send("POST", "/dynamic/ping", None).await;
                    assert_eq!(status, StatusCode::OK, "unexpected response {body}");
                }
            })
        })
        .collect();

    swapper.await.unwrap();
    for caller in callers {
        caller.await.unwrap();
    }

    // Every replaced datasource was released; the current one is live.
    for n in 0..20 {
        assert!(app.connector.is_closed(n));
    }
    assert!(!app.connector.is_closed(20));
}
