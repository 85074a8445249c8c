#![cfg(target_os = "windows")]

//! ViGEmBus virtual pads.
//!
//! [`VirtualBus`] is the process-wide bus connection. It is created once by the
//! entry point, handed to the registry as its [`PadFactory`], and released
//! when the last pad and the owner drop it. Each bridge gets its own
//! [`ViGEmPad`] (an Xbox 360 wired target).
//!
//! Rumble and LED notifications are delivered on a thread owned by
//! `vigem-client` and forwarded to the bridge's [`FeedbackHandler`].

use crate::error::SinkError;
use crate::report::FeedbackCommand;
use crate::sink::{FeedbackHandler, PadFactory, PadFrame, VirtualPad};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use vigem_client::{Client, TargetId, XButtons, XGamepad, Xbox360Wired};

fn sink_error(e: vigem_client::Error) -> SinkError {
    match e {
        vigem_client::Error::AlreadyConnected => SinkError::AlreadyConnected,
        other => SinkError::Bus(format!("{other:?}")),
    }
}

/// Connection to the ViGEmBus driver.
#[derive(Clone)]
pub struct VirtualBus {
    client: Arc<Client>,
}

impl VirtualBus {
    pub fn connect() -> Result<Self, SinkError> {
        let client = Client::connect().map_err(sink_error)?;
        info!("connected to ViGEmBus");
        Ok(Self {
            client: Arc::new(client),
        })
    }
}

impl PadFactory for VirtualBus {
    fn create(&self) -> Result<Box<dyn VirtualPad>, SinkError> {
        Ok(Box::new(ViGEmPad {
            target: Xbox360Wired::new(Arc::clone(&self.client), TargetId::XBOX360_WIRED),
            handler: None,
            listener: None,
        }))
    }
}

/// One Xbox 360 wired target.
pub struct ViGEmPad {
    target: Xbox360Wired<Arc<Client>>,
    handler: Option<FeedbackHandler>,
    listener: Option<JoinHandle<()>>,
}

impl ViGEmPad {
    fn listen_for_feedback(&mut self) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        match self.target.request_notification() {
            Ok(request) => {
                // exits once the target is unplugged; joined in `disconnect`
                self.listener = Some(request.spawn_thread(move |_, n| {
                    handler(FeedbackCommand {
                        small_motor: n.small_motor,
                        large_motor: n.large_motor,
                        led_index: n.led_number,
                    });
                }));
            }
            Err(e) => warn!(error = ?e, "cannot subscribe to rumble notifications"),
        }
    }
}

impl VirtualPad for ViGEmPad {
    fn connect(&mut self) -> Result<(), SinkError> {
        self.target.plugin().map_err(sink_error)?;
        self.target.wait_ready().map_err(sink_error)?;
        self.listen_for_feedback();
        debug!("virtual pad plugged in");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SinkError> {
        self.target.unplug().map_err(sink_error)?;
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                warn!("rumble notification thread panicked");
            }
        }
        debug!("virtual pad unplugged");
        Ok(())
    }

    fn submit(&mut self, frame: &PadFrame) -> Result<(), SinkError> {
        let gamepad = XGamepad {
            buttons: XButtons {
                raw: frame.buttons.0,
            },
            left_trigger: frame.left_trigger,
            right_trigger: frame.right_trigger,
            thumb_lx: frame.thumb_lx,
            thumb_ly: frame.thumb_ly,
            thumb_rx: frame.thumb_rx,
            thumb_ry: frame.thumb_ry,
        };
        self.target.update(&gamepad).map_err(sink_error)
    }

    fn set_feedback_handler(&mut self, handler: FeedbackHandler) {
        self.handler = Some(handler);
    }
}
