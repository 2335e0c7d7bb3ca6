pub mod ingress;
pub mod initiation;
pub mod reconciler;
pub mod state_machine;
