pub mod product;
pub mod trial;

pub use product::{ProductCatalog, ProductMatches, ProductRecord};
pub use trial::{TrialCatalog, TrialRecord};
