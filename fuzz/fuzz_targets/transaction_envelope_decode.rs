#![no_main]

use libfuzzer_sys::fuzz_target;
use sirrah_gateway::{decode_transaction_params, EncodedTransaction, TransactionKind};

fuzz_target!(|data: &[u8]| {
    let Ok(transaction) = EncodedTransaction::from_bytes(data.to_vec()) else {
        return;
    };
    match transaction.kind() {
        TransactionKind::Legacy => assert!(data[0] >= 0xc0),
        TransactionKind::Typed(tx_type) => assert_eq!(tx_type, data[0]),
    }

    let params = serde_json::Value::String(format!("0x{}", hex::encode(data)));
    let decoded = decode_transaction_params(&params).expect("hex params decode back");
    assert_eq!(decoded, transaction);
    assert_eq!(decoded.into_bytes(), data);
});
