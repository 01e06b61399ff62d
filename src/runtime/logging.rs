// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Initializes logging features. The log specification is taken from the RUST_LOG environment variable when set.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        if let Ok(logger) = Logger::try_with_env_or_str("info") {
            let _ = logger.start();
        }
    });
}
