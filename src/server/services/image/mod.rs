mod cropper;
mod preprocess;

pub use cropper::GridCropper;
pub use preprocess::compress_for_upload;
