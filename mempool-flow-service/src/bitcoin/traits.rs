use async_trait::async_trait;
use std::collections::HashMap;

use super::{BitcoinRpcClient, MempoolEntry, MockNode, RawTransaction, RpcError};

/// Node operations the summary engine and the mempool logger depend on
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Txids currently in the mempool
    async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError>;

    /// Mempool entries keyed by txid
    async fn get_raw_mempool_verbose(&self) -> Result<HashMap<String, MempoolEntry>, RpcError>;

    /// Decoded transaction, `None` if unknown to the node
    async fn get_raw_transaction(&self, txid: &str) -> Result<Option<RawTransaction>, RpcError>;
}

#[async_trait]
impl NodeRpc for BitcoinRpcClient {
    async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        BitcoinRpcClient::get_raw_mempool(self).await
    }

    async fn get_raw_mempool_verbose(&self) -> Result<HashMap<String, MempoolEntry>, RpcError> {
        BitcoinRpcClient::get_raw_mempool_verbose(self).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Option<RawTransaction>, RpcError> {
        BitcoinRpcClient::get_raw_transaction(self, txid).await
    }
}

/// Wrapper enum for real or mock node
pub enum NodeClient {
    Real(BitcoinRpcClient),
    Mock(MockNode),
}

impl NodeClient {
    /// Shuts down the real gateway's workers; no-op for the mock
    pub async fn close(self) {
        if let NodeClient::Real(client) = self {
            client.close().await;
        }
    }
}

#[async_trait]
impl NodeRpc for NodeClient {
    async fn get_raw_mempool(&self) -> Result<Vec<String>, RpcError> {
        match self {
            NodeClient::Real(client) => client.get_raw_mempool().await,
            NodeClient::Mock(node) => node.get_raw_mempool().await,
        }
    }

    async fn get_raw_mempool_verbose(&self) -> Result<HashMap<String, MempoolEntry>, RpcError> {
        match self {
            NodeClient::Real(client) => client.get_raw_mempool_verbose().await,
            NodeClient::Mock(node) => node.get_raw_mempool_verbose().await,
        }
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Option<RawTransaction>, RpcError> {
        match self {
            NodeClient::Real(client) => client.get_raw_transaction(txid).await,
            NodeClient::Mock(node) => node.get_raw_transaction(txid).await,
        }
    }
}
