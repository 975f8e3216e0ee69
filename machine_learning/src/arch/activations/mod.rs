mod act_fn;
mod relu;
mod sigmoid;

pub(crate) use sigmoid::sigmoid;

pub use act_fn::ActFn;
pub use relu::Relu;
