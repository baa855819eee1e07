pub mod diskstats;
