pub mod cgi;
