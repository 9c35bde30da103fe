//! Matrix module: local sparse row storage, distributed matrices and their product.

pub mod arena;
pub mod dist;
pub mod layout;
pub mod product;
pub mod row_store;
pub mod scatter;
pub mod sorted_list;
pub mod sparse;

pub use arena::GrowableColumnArena;
pub use dist::{ColumnClass, DistMatrix};
pub use layout::Layout;
pub use product::{MatReuse, ProductPlan, mat_mat_mult, multiply_numeric, multiply_symbolic};
pub use row_store::{InsertMode, MatInfo, RowArrays, RowArraysMut, RowStore};
pub use scatter::GhostScatter;
pub use sorted_list::SortedIndexList;
pub use sparse::{SparseMatrixBackend, to_faer_csr};
