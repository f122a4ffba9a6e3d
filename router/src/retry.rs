//! Periodic ARP retry and expiry sweep.
//!
//! The harness runs [`Router::arp_sweep`] once per second, in parallel with
//! the dispatcher.  The sweep mutates the shared ARP state under its lock and
//! receives the resulting I/O as data; requests and diagnostics are emitted
//! only after the lock has been released.

use log::debug;

use crate::icmp;
use crate::iface::{Clock, Transport};
use crate::neighbor::SweepAction;
use crate::router::{Router, RouterStats};

impl<T: Transport, C: Clock> Router<T, C> {
    /// One sweep over the ARP state: age out cache entries, retransmit
    /// overdue requests, and fail resolutions that exhausted their retries.
    ///
    /// A failed resolution answers every frame it withheld with
    /// host-unreachable toward that frame's source, out of the interface the
    /// frame arrived on.  Transport failures are logged and do not stop the
    /// sweep.
    pub fn arp_sweep(&self) {
        let now = self.clock.now();
        for action in self.neighbors.sweep(now) {
            match action {
                SweepAction::Retransmit { target, egress } => {
                    let Some(iface) = self.interface(egress) else {
                        continue;
                    };
                    if let Err(e) = self.send_arp_request(iface, target) {
                        debug!("sweep: retransmit for {target} failed: {e}");
                    }
                }
                SweepAction::Expire { withheld } => {
                    RouterStats::bump(&self.stats.expired);
                    for held in withheld {
                        let Some(ingress) = self.interface(held.ingress) else {
                            continue;
                        };
                        if let Err(e) = self.send_icmp(
                            icmp::TYPE_DEST_UNREACHABLE,
                            icmp::CODE_HOST_UNREACHABLE,
                            held.frame.as_slice(),
                            ingress,
                        ) {
                            debug!("sweep: host-unreachable reply failed: {e}");
                        }
                    }
                }
            }
        }
    }
}
