// Handshake module: payloads, per-attempt state machine, engines and the
// finalized authenticated session.
//
//   Initiator                                  Responder (via hello gateway)
//     |--- InitiatorHello (eph_i, suites) ------>|
//     |<-- ResponderHello (eph_r, suite) --------|
//     |--- InitiatorHandshake (sealed, signed) ->|
//     |<-- ResponderHandshake (sealed, signed) --|
//     |====== MAC-protected application data ====|

pub mod messages;
pub mod protocol;
pub mod session;
pub mod state;
