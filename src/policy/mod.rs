//! Chaincode endorsement policies: fetching them from the network, compiling
//! them into a boolean combinator over organisations' peers and resolving
//! that combinator to one concrete, load-balanced peer set.
mod group;
mod provider;

pub use group::{
    compile, compile_all, ChaincodeData, Group, LoadBalancePolicy, LoadBalancer, PeerGroup,
    PeerSorter, SignaturePolicy,
};
pub use provider::PolicyProvider;
