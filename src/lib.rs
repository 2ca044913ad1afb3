pub mod libs {
    pub mod commands;
    pub mod common;
    pub mod device;
    pub mod gdb_client;
    pub mod gdb_proto;
    pub mod gdb_server;
    pub mod input_async;
    pub mod interrupt;
    pub mod options;
    pub mod output;
    pub mod sim;
    pub mod sockets;
}
