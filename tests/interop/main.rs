//! Integration tests for kernel-interop, driven by an in-process mock
//! kernel speaking the real frame protocol over a duplex pipe.


mod debugger;
mod lifecycle;
mod repl;
mod table;
