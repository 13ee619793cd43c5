use mempool_flow_service::bitcoin::{
    BitcoinRpcClient, BitcoinRpcConfig, NodeRpc, RpcError, TxInput,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> BitcoinRpcClient {
    BitcoinRpcClient::new(BitcoinRpcConfig {
        url: server.uri(),
        username: "user".to_string(),
        password: "pass".to_string(),
        workers: 2,
        queue_capacity: 16,
    })
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "result": result, "error": null, "id": "0" }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    // Bitcoin Core reports RPC errors with HTTP 500 or 404 and a JSON body
    ResponseTemplate::new(500).set_body_json(json!({
        "result": null,
        "error": { "code": code, "message": message },
        "id": "0"
    }))
}

#[tokio::test]
async fn test_request_wire_format_and_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .and(body_partial_json(
            json!({ "jsonrpc": "1.0", "method": "getrawmempool", "params": [false] }),
        ))
        .respond_with(rpc_result(json!(["aa", "bb"])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(client.get_raw_mempool().await.unwrap(), vec!["aa", "bb"]);
    assert_eq!(client.get_raw_mempool().await.unwrap(), vec!["aa", "bb"]);

    // Every request carries the next id of the counter, as a string
    let requests = server.received_requests().await.unwrap();
    let ids: Vec<Value> = requests
        .iter()
        .map(|request| request.body_json::<Value>().unwrap()["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("0"), json!("1")]);

    client.close().await;
}

#[tokio::test]
async fn test_verbose_mempool_decoding() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getrawmempool", "params": [true] })))
        .respond_with(rpc_result(json!({
            "aa": { "vsize": 141, "weight": 561, "time": 1_700_000_000, "height": 820_000 },
            "bb": { "vsize": 110, "weight": 440, "time": 1_700_000_060, "height": 820_001 }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let entries = client.get_raw_mempool_verbose().await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries["aa"].time, 1_700_000_000);
    assert_eq!(entries["bb"].weight, Some(440));

    client.close().await;
}

#[tokio::test]
async fn test_get_raw_transaction_decodes_verbose_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getrawtransaction", "params": ["bb", true] })))
        .respond_with(rpc_result(json!({
            "txid": "bb",
            "hash": "bb",
            "size": 222,
            "vsize": 141,
            "weight": 561,
            "vin": [{ "txid": "aa", "vout": 1, "sequence": 4294967293u32 }],
            "vout": [{ "value": 0.0015, "n": 0, "scriptPubKey": { "hex": "0014" } }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let tx = client.get_raw_transaction("bb").await.unwrap().unwrap();

    assert_eq!(tx.weight, 561);
    assert_eq!(tx.vin, vec![TxInput::spending("aa", 1)]);
    assert_eq!(tx.output_value_sat(), 150_000);

    client.close().await;
}

#[tokio::test]
async fn test_unknown_transaction_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getrawtransaction" })))
        .respond_with(rpc_error(-5, "No such mempool or blockchain transaction"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.get_raw_transaction("ff").await.unwrap().is_none());

    client.close().await;
}

#[tokio::test]
async fn test_other_node_errors_propagate() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(rpc_error(-8, "parameter 1 must be hexadecimal"))
        .mount(&server)
        .await;

    let client = client_for(&server);

    match client.get_raw_transaction("zz").await {
        Err(RpcError::Node { code, message }) => {
            assert_eq!(code, -8);
            assert_eq!(message, "parameter 1 must be hexadecimal");
        }
        other => panic!("expected node error, got {other:?}"),
    }
    // The same error through the generic path
    let err = client.get_raw_mempool().await.unwrap_err();
    assert_eq!(err.node_code(), Some(-8));
    assert!(!err.is_transport());

    client.close().await;
}

#[tokio::test]
async fn test_undecodable_body_keeps_raw_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let client = client_for(&server);

    match client.get_raw_mempool().await {
        Err(RpcError::Decode { body, .. }) => assert_eq!(body, "Unauthorized"),
        other => panic!("expected decode error, got {other:?}"),
    }

    client.close().await;
}

#[tokio::test]
async fn test_unexpected_result_shape_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(rpc_result(json!({ "not": "a list" })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_raw_mempool().await.unwrap_err();

    assert!(matches!(err, RpcError::Decode { ref body, .. } if body.contains("a list")));

    client.close().await;
}

#[tokio::test]
async fn test_unreachable_node_is_transport_error() {
    let client = BitcoinRpcClient::new(BitcoinRpcConfig {
        url: "http://127.0.0.1:1".to_string(),
        ..Default::default()
    });

    let err = client.get_raw_mempool().await.unwrap_err();
    assert!(matches!(err, RpcError::Http(_)));
    assert!(err.is_transport());

    client.close().await;
}

#[tokio::test]
async fn test_many_concurrent_calls_through_few_workers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(rpc_result(json!(["aa"])))
        .expect(40)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let calls = (0..40).map(|_| client.get_raw_mempool());
    let results = futures::future::join_all(calls).await;

    let expected = vec!["aa".to_string()];
    assert!(results
        .iter()
        .all(|result| result.as_ref().is_ok_and(|txids| txids == &expected)));

    // Ids stay unique under concurrency
    let mut ids: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.body_json::<Value>().unwrap()["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 40);

    client.close().await;
}

#[tokio::test]
async fn test_gateway_through_trait_object() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(rpc_result(json!(["cc"])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let node: &dyn NodeRpc = &client;
    assert_eq!(node.get_raw_mempool().await.unwrap(), vec!["cc"]);

    client.close().await;
}
