pub mod confirmation_poller;
