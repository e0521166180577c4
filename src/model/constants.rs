pub const CHANNELS: usize = 3;

/// Overall stride of the discriminator: its patch grid is the input
/// resolution divided by this factor.
pub const PATCH_STRIDE: usize = 4;
