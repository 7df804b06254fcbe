//! CBOR record helpers shared by the sled-backed stores
use crate::error::TradeError;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, TradeError>;

pub(crate) fn abort<T>(err: TradeError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, TradeError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, TradeError> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn tx_read<T>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => decode(&bytes)
            .map(Some)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_write<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> TxResult<()> {
    let bytes = encode(value).map_err(ConflictableTransactionError::Abort)?;
    tree.insert(key, bytes)?;
    Ok(())
}

/// Decodes every record in a tree
pub(crate) fn scan<T>(tree: &sled::Tree) -> Result<Vec<T>, TradeError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    tree.iter()
        .values()
        .map(|value| decode(&value?))
        .collect()
}
