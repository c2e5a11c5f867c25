pub(crate) mod lattice;
pub(crate) mod transfer;
pub(crate) mod worklist;
