pub mod flash;
pub mod socket;

pub use flash::{FlashHandle, FlashPlayer, Frame, Haptics, NoHaptics, Phase};
pub use socket::{ConnectionStatus, DeviceSocket, SocketConfig};
