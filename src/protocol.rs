//! Wire format between the hub and the node agents
//!
//! Every message is one frame: a 4-byte big-endian payload length followed
//! by a JSON document. The hub sends one [`PollRequest`] per connection and
//! waits for one [`PollResponse`].
//!
//! ```text
//! +----------------+-------------------------------+
//! | len: u32 (BE)  | JSON payload (len bytes)      |
//! +----------------+-------------------------------+
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{DeviceId, Measurement, Sensor, SensorId};

/// Largest payload accepted in either direction
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// What a node needs to know to read one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub id: SensorId,
    pub mac: String,
    pub device: DeviceId,
}

impl SensorDescriptor {
    /// Returns `None` for sensors that are not attached to a device.
    pub fn from_sensor(sensor: &Sensor) -> Option<Self> {
        Some(Self {
            id: sensor.id,
            mac: sensor.mac.clone(),
            device: sensor.device?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    pub sensors: Vec<SensorDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the stream before a frame header arrived
    #[error("connection closed by peer")]
    Closed,

    #[error("frame of {0} bytes exceeds the limit of {MAX_FRAME_LEN} bytes")]
    TooLarge(usize),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and deserialize its payload
///
/// A clean end of stream before the length prefix yields `FrameError::Closed`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}
