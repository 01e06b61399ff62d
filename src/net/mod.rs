// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

mod socket;

pub use self::socket::{
    AcceptFrame,
    ConnectFrame,
    ReadBytesFrame,
    ReadUntilFrame,
    RecvFrame,
    SendFrame,
    Socket,
};
