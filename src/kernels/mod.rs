pub mod conv2d;
pub mod dilation;
pub mod element;
pub mod elementwise;
pub mod lanes;
pub mod matxvec;
pub mod quantization;
pub mod ring;
pub mod utils;
pub mod window;
pub use conv2d::{
    conv2d_std, conv2d_std_asym8xasym8, conv2d_std_per_chan_sym8sxasym8s, conv2d_std_scratch_size,
    conv2d_std_sym8sxsym16s, Conv2dParams,
};
pub use element::{BiasElement, Precision, Quantized};
pub use elementwise::{elm_mul_broadcast, elm_mul_broadcast_asym8sxasym8s, elm_mul_broadcast_sym16sxsym16s, ElementwiseParams};
pub use lanes::{DotBackend, ScalarLanes, UnrolledLanes};
pub use matxvec::{matxvec, matxvec_asym8xasym8, matxvec_per_chan_sym8sxasym8s, matxvec_sym8sxsym16s, MatXVecShape};
pub use quantization::*;
pub use window::{AxisPlan, ColumnSchedule, ConvState, LoaderStats};
