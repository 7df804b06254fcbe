//! Book registry: owns book records and their `available` flag.
//!
//! Listing CRUD lives outside this crate; the registry exposes only what the
//! trade engine consumes, plus `insert` for whoever populates it.
use crate::error::TradeError;
use crate::store::{self, TxResult};
use crate::types::{BookId, UserId};
use serde::Serialize;
use sled::transaction::TransactionalTree;

pub(crate) const BOOKS_TREE: &str = "books";

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[n(0)]
    pub id: BookId,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub author: String,
    #[n(3)]
    pub owner_id: UserId,
    #[n(4)]
    pub available: bool,
}

impl Book {
    /// A freshly listed, available book
    pub fn new(owner_id: UserId, title: &str, author: &str) -> anyhow::Result<Self> {
        Ok(Self {
            id: BookId::generate()?,
            title: title.to_owned(),
            author: author.to_owned(),
            owner_id,
            available: true,
        })
    }
}

#[derive(Clone)]
pub struct BookRegistry {
    tree: sled::Tree,
}

impl BookRegistry {
    pub fn open(db: &sled::Db) -> Result<Self, TradeError> {
        Ok(Self {
            tree: db.open_tree(BOOKS_TREE)?,
        })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    pub fn insert(&self, book: &Book) -> Result<(), TradeError> {
        self.tree.insert(book.id.as_bytes(), store::encode(book)?)?;
        Ok(())
    }

    pub fn get_book(&self, id: &BookId) -> Result<Book, TradeError> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => store::decode(&bytes),
            None => Err(TradeError::not_found("book", id)),
        }
    }

    pub fn set_available(&self, id: &BookId, available: bool) -> Result<Book, TradeError> {
        let book = self.tree.transaction(|tx| {
            let mut book = load_book(tx, id)?;
            book.available = available;
            store_book(tx, &book)?;
            Ok(book)
        })?;
        Ok(book)
    }

    pub fn transfer_owner(&self, id: &BookId, new_owner: &UserId) -> Result<Book, TradeError> {
        let book = self.tree.transaction(|tx| {
            let mut book = load_book(tx, id)?;
            book.owner_id = new_owner.clone();
            store_book(tx, &book)?;
            Ok(book)
        })?;
        Ok(book)
    }

    pub fn books_of(&self, owner: &UserId) -> Result<Vec<Book>, TradeError> {
        let books: Vec<Book> = store::scan(&self.tree)?;
        Ok(books.into_iter().filter(|b| b.owner_id == *owner).collect())
    }
}

pub(crate) fn load_book(tx: &TransactionalTree, id: &BookId) -> TxResult<Book> {
    match store::tx_read(tx, id.as_bytes())? {
        Some(book) => Ok(book),
        None => store::abort(TradeError::not_found("book", id)),
    }
}

pub(crate) fn store_book(tx: &TransactionalTree, book: &Book) -> TxResult<()> {
    store::tx_write(tx, book.id.as_bytes(), book)
}
