//! SeaORM entity models
//!
//! Database entities for the retrieval corpus

mod index_state;
mod term_frequency;

pub use term_frequency::{
    Entity as TermFrequencyEntity,
    Model as TermFrequency,
    ActiveModel as TermFrequencyActiveModel,
    Column as TermFrequencyColumn,
};

pub use index_state::{
    Entity as IndexStateEntity,
    Model as IndexStateModel,
    ActiveModel as IndexStateActiveModel,
    Column as IndexStateColumn,
};
