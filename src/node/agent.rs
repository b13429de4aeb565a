use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::reader::SensorReader;
use crate::Measurement;
use crate::protocol::{FrameError, PollRequest, PollResponse, SensorDescriptor, read_frame, write_frame};

/// Node side of the link: answers poll requests with fresh readings
///
/// Every accepted connection is served on its own task, one request after
/// the other, until the hub closes it.
pub struct NodeAgent {
    listener: TcpListener,
    reader: Arc<dyn SensorReader>,
}

impl NodeAgent {
    pub async fn bind(addr: impl ToSocketAddrs, reader: Arc<dyn SensorReader>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, reader })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever
    #[instrument(skip(self))]
    pub async fn run(self) {
        match self.local_addr() {
            Ok(addr) => info!("node agent listening on {addr}"),
            Err(e) => warn!("node agent listening on unknown address: {e}"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("connected by {peer}");
                    tokio::spawn(serve_connection(stream, peer, self.reader.clone()));
                }
                Err(e) => {
                    error!("failed to accept connection: {e}");
                }
            }
        }
    }

    /// Run the agent on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[instrument(skip(stream, reader))]
async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, reader: Arc<dyn SensorReader>) {
    loop {
        let request: PollRequest = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(FrameError::Closed) => {
                trace!("connection closed by hub");
                break;
            }
            Err(e) => {
                warn!("dropping connection after bad request: {e}");
                break;
            }
        };

        let measurements = read_sensors(reader.as_ref(), &request.sensors).await;
        trace!("answering with {} measurements", measurements.len());

        if let Err(e) = write_frame(&mut stream, &PollResponse { measurements }).await {
            warn!("failed to send response: {e}");
            break;
        }
    }
}

/// Read all requested sensors, skipping those that fail
pub async fn read_sensors(
    reader: &dyn SensorReader,
    sensors: &[SensorDescriptor],
) -> Vec<Measurement> {
    let mut measurements = Vec::new();
    for sensor in sensors {
        match reader.read(sensor).await {
            Ok(readings) => measurements.extend(readings),
            Err(e) => warn!("failed to read sensor {} ({}): {e:#}", sensor.id, sensor.mac),
        }
    }
    measurements
}
