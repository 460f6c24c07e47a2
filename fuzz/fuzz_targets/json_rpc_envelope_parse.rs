#![no_main]

use libfuzzer_sys::fuzz_target;
use sirrah_gateway::{
    decode_transaction_params, JsonRpcErrorResponse, JsonRpcRequest, RpcGatewayError,
    TransactionKind, JSON_RPC_INVALID_REQUEST_CODE,
};

fuzz_target!(|data: &[u8]| {
    let request = match serde_json::from_slice::<JsonRpcRequest>(data) {
        Ok(request) => request,
        Err(error) => {
            let response = JsonRpcErrorResponse::unparsed(&RpcGatewayError::InvalidEnvelope(error));
            assert_eq!(response.error.code, JSON_RPC_INVALID_REQUEST_CODE);
            assert!(response.id.is_null());
            return;
        }
    };

    match decode_transaction_params(&request.params) {
        Ok(transaction) => {
            let kind = transaction.kind();
            let payload = transaction.into_bytes();
            match kind {
                TransactionKind::Legacy => assert!(payload[0] >= 0xc0),
                TransactionKind::Typed(tx_type) => assert_eq!(payload[0], tx_type),
            }
        }
        Err(error) => {
            let response =
                JsonRpcErrorResponse::for_request(&request, &RpcGatewayError::from(error));
            assert_eq!(response.id, request.id);
            assert!(response
                .error
                .message
                .starts_with("could not unmarshal transaction: "));
        }
    }
});
