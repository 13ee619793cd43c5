//! Bitcoin Core RPC gateway and node abstractions

mod mock_client;
mod rpc_client;
mod traits;
mod types;

pub use mock_client::MockNode;
pub use rpc_client::{
    BitcoinRpcClient, BitcoinRpcConfig, RpcCall, RpcError, RPC_INVALID_ADDRESS_OR_KEY,
};
pub use traits::{NodeClient, NodeRpc};
pub use types::{btc_to_sat, MempoolEntry, RawTransaction, TxInput, TxOutput};
