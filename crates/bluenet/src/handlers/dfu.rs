use bluenet_codec::packets::image_size_packet;
use bluenet_codec::DataStepper;
use bluenet_core::ids::{dfu, services};
use bluenet_core::PeripheralHandle;
use bluenet_transport_ble::{BleError, BleScheduler, NotificationSubscription, WriteMode};
use tracing::{debug, info, warn};

use crate::error::BluenetError;

/// Control-point opcode that starts a firmware transfer.
pub const START_DFU: u8 = 0x01;
/// Control-point opcode announcing the init packet.
pub const INITIALIZE_DFU: u8 = 0x02;
/// First byte of every control-point notification.
pub const RESPONSE_CODE: u8 = 0x10;

/// Sizes of the firmware parts in one update, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSizes {
    pub softdevice: u32,
    pub bootloader: u32,
    pub application: u32,
}

/// Notification sent by the bootloader on the control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuResponse {
    pub request_op_code: u8,
    pub status: u8,
}

impl DfuResponse {
    pub const SUCCESS: u8 = 0x01;

    pub fn parse(data: &[u8]) -> Result<Self, BluenetError> {
        let mut stepper = DataStepper::new(data);
        if stepper.u8()? != RESPONSE_CODE {
            return Err(BluenetError::InvalidInput("not a dfu response"));
        }
        Ok(Self {
            request_op_code: stepper.u8()?,
            status: stepper.u8()?,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::SUCCESS
    }
}

/// Handshake with the legacy bootloader ahead of a firmware transfer.
///
/// Streaming the image itself is left to the caller.
#[derive(Clone)]
pub struct DfuHandler {
    scheduler: BleScheduler,
}

impl DfuHandler {
    pub fn new(scheduler: BleScheduler) -> Self {
        Self { scheduler }
    }

    /// Enables control-point notifications, sends the start opcode and the
    /// image sizes. The returned subscription receives the bootloader's
    /// answers; hand it back to [`DfuHandler::finish`] when done.
    pub async fn start(
        &self,
        handle: &PeripheralHandle,
        sizes: ImageSizes,
    ) -> Result<NotificationSubscription, BluenetError> {
        let subscription = self.enable_control_point_notifications(handle).await?;
        let outcome = async {
            self.send_opcode(handle, START_DFU).await?;
            self.write_image_size(handle, sizes).await
        }
        .await;
        if let Err(err) = outcome {
            if let Err(cleanup) = self.finish(subscription).await {
                warn!(parent: self.scheduler.span(), %handle, err = %cleanup, "failed to disable dfu notifications");
            }
            return Err(err);
        }
        info!(parent: self.scheduler.span(), %handle, application = sizes.application, "dfu started");
        Ok(subscription)
    }

    pub async fn enable_control_point_notifications(
        &self,
        handle: &PeripheralHandle,
    ) -> Result<NotificationSubscription, BluenetError> {
        Ok(self
            .scheduler
            .enable_notifications(handle, services::DFU, dfu::CONTROL_POINT)
            .await?)
    }

    pub async fn send_opcode(&self, handle: &PeripheralHandle, op_code: u8) -> Result<(), BluenetError> {
        debug!(parent: self.scheduler.span(), %handle, op_code, "dfu opcode");
        self.scheduler
            .write(
                handle,
                services::DFU,
                dfu::CONTROL_POINT,
                &[op_code],
                WriteMode::WithResponse,
            )
            .await?;
        Ok(())
    }

    /// The bootloader expects the sizes on the packet characteristic
    /// without write response.
    pub async fn write_image_size(&self, handle: &PeripheralHandle, sizes: ImageSizes) -> Result<(), BluenetError> {
        let packet = image_size_packet(sizes.softdevice, sizes.bootloader, sizes.application);
        self.scheduler
            .write(
                handle,
                services::DFU,
                dfu::PACKET,
                &packet,
                WriteMode::WithoutResponse,
            )
            .await?;
        Ok(())
    }

    pub async fn write_init_data(&self, handle: &PeripheralHandle) -> Result<(), BluenetError> {
        self.send_opcode(handle, INITIALIZE_DFU).await
    }

    /// Waits for the next control-point answer within the notification
    /// stream deadline.
    pub async fn next_response(
        &self,
        subscription: &mut NotificationSubscription,
    ) -> Result<DfuResponse, BluenetError> {
        let deadline = self.scheduler.config().notification_stream;
        match tokio::time::timeout(deadline, subscription.next()).await {
            Ok(Some(data)) => DfuResponse::parse(&data),
            Ok(None) => Err(BleError::Disconnected.into()),
            Err(_) => Err(BleError::NotificationStreamTimeout.into()),
        }
    }

    pub async fn finish(&self, subscription: NotificationSubscription) -> Result<(), BluenetError> {
        Ok(self.scheduler.disable_notifications(subscription).await?)
    }
}
